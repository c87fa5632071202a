//! Bounded FIFO queue of work items.
//!
//! Enqueue waits for a free slot instead of dropping, which throttles
//! producers when the dispatcher falls behind. The queue is a cheap
//! cloneable handle; every clone refers to the same channel.

use crate::error::{Error, Result};
use crate::model::WorkItem;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Clone)]
pub struct BoundedQueue {
    tx: mpsc::Sender<WorkItem>,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    closed: CancellationToken,
    capacity: usize,
}

impl BoundedQueue {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// A capacity of zero is a configuration error.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "queue capacity must be greater than zero".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: CancellationToken::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently buffered (including slots reserved by
    /// producers that are mid-send).
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Append an item, waiting while the queue is full.
    pub async fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.push(item, None).await
    }

    /// Like [`enqueue`](Self::enqueue), but gives up with
    /// [`Error::Cancelled`] when `cancel` fires before a slot frees up.
    pub async fn enqueue_with_cancel(
        &self,
        item: WorkItem,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.push(item, Some(cancel)).await
    }

    async fn push(&self, item: WorkItem, cancel: Option<&CancellationToken>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::QueueClosed);
        }

        // Reserve first so the item is only moved once a slot is ours.
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::QueueClosed),
            _ = cancelled(cancel) => return Err(Error::Cancelled),
            permit = self.tx.reserve() => permit.map_err(|_| Error::QueueClosed)?,
        };

        trace!(work_id = %item.id(), handler = %item.kind(), "enqueued");
        permit.send(item);
        record_operation("enqueue");
        Ok(())
    }

    /// Take the oldest item, waiting while the queue is empty.
    ///
    /// Returns [`Error::Cancelled`] without removing anything if `cancel`
    /// fires first. After [`close`](Self::close), remaining items are still
    /// handed out, then [`Error::QueueClosed`].
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<WorkItem> {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.rx.lock() => guard,
        };

        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            item = rx.recv() => item.ok_or(Error::QueueClosed)?,
            _ = self.closed.cancelled() => rx.try_recv().map_err(|_| Error::QueueClosed)?,
        };

        trace!(work_id = %item.id(), handler = %item.kind(), "dequeued");
        record_operation("dequeue");
        Ok(item)
    }

    /// Permanently close the queue. Pending and future enqueues fail with
    /// [`Error::QueueClosed`].
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn record_operation(operation: &'static str) {
    metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
}
