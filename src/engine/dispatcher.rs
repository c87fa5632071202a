//! Dispatch loop: drain the queue, run each item on its own task, retry or drop.
//!
//! Shutdown stops dequeuing. In-flight handlers are not awaited unless a
//! drain timeout is configured; without one they keep running detached and
//! any retries they enqueue stay in the queue unprocessed.

use crate::config::QueueConfig;
use crate::engine::attempt::{self, AttemptOutcome};
use crate::engine::retry::{RetryDecision, RetryLedger};
use crate::error::{Error, Result};
use crate::event::{DiscardReason, Event, EventKind, EventStream};
use crate::handler::HandlerResolver;
use crate::model::WorkItem;
use crate::queue::BoundedQueue;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_outcome, start_task_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

/// Events buffered per subscriber before the oldest are dropped.
const EVENT_BUFFER: usize = 1024;

/// Lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Constructed, `run` not called yet.
    Idle,
    Running,
    /// Shutdown requested; loop exiting or draining in-flight work.
    Stopping,
    Stopped,
}

/// The single consumer of the task queue.
#[derive(Clone)]
pub struct Dispatcher {
    queue: BoundedQueue,
    resolver: Arc<dyn HandlerResolver>,
    ledger: Arc<RetryLedger>,
    events: Arc<EventStream>,
    config: QueueConfig,
    shutdown: CancellationToken,
    in_flight: TaskTracker,
    limiter: Option<Arc<Semaphore>>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        queue: BoundedQueue,
        resolver: Arc<dyn HandlerResolver>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            resolver,
            ledger: Arc::new(RetryLedger::new(config.max_retries)),
            events: Arc::new(EventStream::new(EVENT_BUFFER)),
            limiter: config.max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
            config,
            shutdown: CancellationToken::new(),
            in_flight: TaskTracker::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to dispatch events. Only events emitted after this call
    /// are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &BoundedQueue {
        &self.queue
    }

    /// Handler executions started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing buffered and no handler running or waiting to re-enqueue.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    pub fn state(&self) -> DispatcherState {
        match (self.running.load(Ordering::SeqCst), self.shutdown.is_cancelled()) {
            (true, false) => DispatcherState::Running,
            (true, true) => DispatcherState::Stopping,
            (false, true) => DispatcherState::Stopped,
            (false, false) => DispatcherState::Idle,
        }
    }

    /// Signal the dispatch loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the dispatch loop until shutdown or until the queue is closed.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Other("dispatcher is already running".to_string()));
        }

        info!(
            capacity = self.queue.capacity(),
            retry_enabled = self.config.retry_enabled,
            max_retries = self.config.max_retries,
            max_concurrent = ?self.config.max_concurrent,
            "dispatcher started"
        );

        loop {
            match self.next_item().await {
                Ok((item, permit)) => self.spawn_execution(item, permit),
                Err(Error::Cancelled) => {
                    info!("dispatcher shutting down");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "dispatcher stopping");
                    break;
                }
            }
        }

        let in_flight = self.drain().await;
        self.shutdown.cancel();
        self.running.store(false, Ordering::SeqCst);
        self.events.emit(EventKind::DispatcherStopped { in_flight });
        info!(in_flight, "dispatcher stopped");
        Ok(())
    }

    /// Wait for a concurrency slot (if capped), then for an item.
    async fn next_item(&self) -> Result<(WorkItem, Option<OwnedSemaphorePermit>)> {
        let permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                permit = Arc::clone(limiter).acquire_owned() => Some(
                    permit.map_err(|_| Error::Other("concurrency limiter closed".to_string()))?,
                ),
            },
            None => None,
        };
        let item = self.queue.dequeue(&self.shutdown).await?;
        Ok((item, permit))
    }

    fn spawn_execution(&self, item: WorkItem, permit: Option<OwnedSemaphorePermit>) {
        let this = self.clone();
        self.in_flight.spawn(async move { this.execute(item, permit).await });
    }

    /// Wait for in-flight executions if a drain timeout is set. Returns how
    /// many were still running afterwards.
    async fn drain(&self) -> usize {
        self.in_flight.close();
        let Some(timeout) = self.config.drain_timeout else {
            return self.in_flight.len();
        };

        let pending = self.in_flight.len();
        if pending > 0 {
            info!(
                pending,
                timeout_ms = timeout.as_millis() as u64,
                "waiting for in-flight tasks"
            );
            if tokio::time::timeout(timeout, self.in_flight.wait())
                .await
                .is_err()
            {
                warn!(remaining = self.in_flight.len(), "drain timed out");
            }
        }
        self.in_flight.len()
    }

    /// Run one attempt of `item` and settle its fate.
    ///
    /// The concurrency permit covers the handler only. It is released
    /// before a retry waits for a queue slot, since that slot is freed by
    /// the dispatcher taking the next item, which needs a permit.
    async fn execute(&self, item: WorkItem, permit: Option<OwnedSemaphorePermit>) {
        let id = item.id();
        let attempt_no = self.ledger.failures(id) + 1;
        let kind = *item.kind();
        let span = start_task_span(&kind, id, attempt_no);
        let handler_label = [KeyValue::new("handler", kind.handler_name)];

        async {
            self.events.emit(EventKind::TaskDispatched {
                id,
                handler: kind.handler_name.to_string(),
                attempt: attempt_no,
            });

            let outcome = attempt::run(self.resolver.as_ref(), &item).await;
            drop(permit);

            match outcome {
                AttemptOutcome::Completed { duration_ms } => {
                    record_outcome(&span, "completed");
                    // Success ends the retry chain.
                    self.ledger.clear(id);
                    metrics::tasks_completed().add(1, &handler_label);
                    metrics::task_duration_ms().record(duration_ms as f64, &handler_label);
                    debug!(work_id = %id, handler = %kind, duration_ms, "task completed");
                    self.events.emit(EventKind::TaskCompleted {
                        id,
                        handler: kind.handler_name.to_string(),
                        duration_ms,
                    });
                }
                AttemptOutcome::Failed { error, duration_ms } => {
                    record_outcome(&span, "failed");
                    metrics::tasks_failed().add(1, &handler_label);
                    metrics::task_duration_ms().record(duration_ms as f64, &handler_label);
                    error!(
                        work_id = %id,
                        handler = %kind,
                        attempt = attempt_no,
                        duration_ms,
                        error = %error,
                        "task handler failed"
                    );
                    self.events.emit(EventKind::TaskFailed {
                        id,
                        handler: kind.handler_name.to_string(),
                        error: error.to_string(),
                        attempt: attempt_no,
                    });

                    if self.config.retry_enabled && item.retry_enabled() {
                        self.back_to_queue(item).await;
                    } else {
                        self.discard(&item, DiscardReason::RetryDisabled);
                    }
                }
                AttemptOutcome::Unresolved { error } => {
                    record_outcome(&span, "unresolved");
                    error!(
                        work_id = %id,
                        handler = %kind,
                        error = %error,
                        "cannot resolve handler, dropping task"
                    );
                    self.discard(&item, DiscardReason::Unresolved);
                }
            }
        }
        .instrument(span.clone())
        .await
    }

    /// Count the failure and either re-enqueue `item` at the back of the
    /// queue or drop it for good.
    async fn back_to_queue(&self, item: WorkItem) {
        let id = item.id();
        match self.ledger.record_failure(id) {
            RetryDecision::Requeue { failures } => {
                info!(
                    work_id = %id,
                    failures,
                    max_retries = self.ledger.max_retries(),
                    "re-enqueueing task"
                );
                metrics::tasks_requeued()
                    .add(1, &[KeyValue::new("handler", item.kind().handler_name)]);
                self.events.emit(EventKind::TaskRequeued { id, failures });

                // Waits under backpressure rather than dropping the retry.
                if let Err(e) = self.queue.enqueue(item).await {
                    self.ledger.clear(id);
                    warn!(work_id = %id, error = %e, "retry could not be enqueued, task dropped");
                    self.events.emit(EventKind::TaskDiscarded {
                        id,
                        reason: DiscardReason::QueueClosed,
                    });
                }
            }
            RetryDecision::Exhausted { failures } => {
                warn!(work_id = %id, failures, "task exhausted retries, discarding");
                self.discard(&item, DiscardReason::RetriesExhausted);
            }
        }
    }

    fn discard(&self, item: &WorkItem, reason: DiscardReason) {
        metrics::tasks_discarded().add(
            1,
            &[
                KeyValue::new("handler", item.kind().handler_name),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
        debug!(work_id = %item.id(), %reason, "task discarded");
        self.events.emit(EventKind::TaskDiscarded {
            id: item.id(),
            reason,
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
