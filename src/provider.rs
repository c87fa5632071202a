//! Producer-facing API for sending background work.
//!
//! Sending resolves the handler kind and enqueues; it never runs the
//! handler and never observes handler failures.

use crate::error::{Error, Result};
use crate::handler::HandlerResolver;
use crate::model::{Payload, SendOptions, TaskRequest, WorkId, WorkItem};
use crate::queue::BoundedQueue;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct TaskProvider {
    queue: BoundedQueue,
    resolver: Arc<dyn HandlerResolver>,
}

impl TaskProvider {
    pub fn new(queue: BoundedQueue, resolver: Arc<dyn HandlerResolver>) -> Self {
        Self { queue, resolver }
    }

    /// Send a request without retry. Waits while the queue is full.
    pub async fn send<R: TaskRequest>(&self, request: R) -> Result<WorkId> {
        self.send_with(Some(Payload::new(request)), SendOptions::new())
            .await
    }

    /// Send a request, opting it in or out of retry.
    pub async fn send_with_retry<R: TaskRequest>(&self, request: R, retry: bool) -> Result<WorkId> {
        self.send_with(Some(Payload::new(request)), SendOptions::new().retry(retry))
            .await
    }

    /// Send a type-erased payload.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `payload` is `None`
    /// - [`Error::HandlerNotFound`] if no handler is registered for it
    /// - [`Error::Cancelled`] if the options' token fires while waiting
    /// - [`Error::QueueClosed`] if the queue was closed
    pub async fn send_with(&self, payload: Option<Payload>, options: SendOptions) -> Result<WorkId> {
        let payload = payload
            .ok_or_else(|| Error::InvalidArgument("request payload is required".to_string()))?;

        let kind = self.resolver.kind_for(&payload).inspect_err(|e| {
            warn!(request = payload.request_name(), error = %e, "cannot send task");
        })?;

        let (cancel, abortable) = match options.cancel {
            Some(token) => (token, true),
            None => (CancellationToken::new(), false),
        };
        let item = WorkItem::new(payload, kind, options.retry, cancel.clone());
        let id = item.id();

        if abortable {
            self.queue.enqueue_with_cancel(item, &cancel).await?;
        } else {
            self.queue.enqueue(item).await?;
        }

        metrics::tasks_enqueued().add(1, &[KeyValue::new("request", kind.request_name)]);
        debug!(work_id = %id, handler = %kind, retry = options.retry, "task sent");
        Ok(id)
    }
}

impl std::fmt::Debug for TaskProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProvider")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
