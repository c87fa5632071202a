//! # taskq
//!
//! Bounded in-process background task queue.
//!
//! Producers send typed requests through a [`TaskProvider`]; a single
//! [`Dispatcher`] drains the queue and runs each request on its own task
//! against a freshly built handler, retrying failures a bounded number of
//! times when both the dispatcher and the request allow it.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod model;
pub mod provider;
pub mod queue;
pub mod telemetry;

pub use engine::{Dispatcher, Engine};
pub use error::{Error, Result};
pub use handler::{HandlerRegistry, HandlerResolver, TaskHandler};
pub use model::{Payload, SendOptions, TaskRequest, WorkId, WorkItem};
pub use provider::TaskProvider;
pub use queue::BoundedQueue;
