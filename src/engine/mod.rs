//! Dispatch engine: the application-owned queue, its dispatcher and provider.
//!
//! One [`Engine`] per application replaces any process-wide queue: it owns
//! the single [`BoundedQueue`] and hands out producer and consumer handles
//! that share it.

pub mod attempt;
pub mod dispatcher;
pub mod retry;

pub use dispatcher::{Dispatcher, DispatcherState};
pub use retry::{RetryDecision, RetryLedger};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::handler::{HandlerRegistry, HandlerResolver};
use crate::provider::TaskProvider;
use crate::queue::BoundedQueue;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Wires configuration, resolver, queue, provider and dispatcher together.
pub struct Engine {
    queue: BoundedQueue,
    provider: TaskProvider,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Build an engine around a handler registry.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::error::Error::Config) for an invalid
    /// configuration, before any task can be sent.
    pub fn new(config: &QueueConfig, registry: HandlerRegistry) -> Result<Self> {
        Self::with_resolver(config, Arc::new(registry))
    }

    /// Build an engine around any resolver implementation.
    pub fn with_resolver(config: &QueueConfig, resolver: Arc<dyn HandlerResolver>) -> Result<Self> {
        config.validate()?;
        let queue = BoundedQueue::new(config.capacity)?;
        let provider = TaskProvider::new(queue.clone(), Arc::clone(&resolver));
        let dispatcher = Dispatcher::new(queue.clone(), resolver, config.clone());
        Ok(Self {
            queue,
            provider,
            dispatcher,
        })
    }

    /// Producer handle. Clone it freely.
    pub fn provider(&self) -> &TaskProvider {
        &self.provider
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn queue(&self) -> &BoundedQueue {
        &self.queue
    }

    /// Run the dispatcher on a background task.
    pub fn start(&self) -> JoinHandle<Result<()>> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move { dispatcher.run().await })
    }

    /// Stop the dispatcher. See [`Dispatcher`] for what happens to
    /// in-flight handlers.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
