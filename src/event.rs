//! Structured events emitted by the dispatcher for every item outcome.
//!
//! Subscribers observe item outcomes without touching the queue. Handler
//! logging stays with `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::model::WorkId;

/// A structured event emitted by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TaskDispatched {
        id: WorkId,
        handler: String,
        attempt: u32,
    },
    TaskCompleted {
        id: WorkId,
        handler: String,
        duration_ms: u64,
    },
    TaskFailed {
        id: WorkId,
        handler: String,
        error: String,
        attempt: u32,
    },
    TaskRequeued {
        id: WorkId,
        failures: u32,
    },
    TaskDiscarded {
        id: WorkId,
        reason: DiscardReason,
    },
    DispatcherStopped {
        in_flight: usize,
    },
}

impl EventKind {
    /// The work item this event is about, if any.
    pub fn work_id(&self) -> Option<WorkId> {
        match self {
            EventKind::TaskDispatched { id, .. }
            | EventKind::TaskCompleted { id, .. }
            | EventKind::TaskFailed { id, .. }
            | EventKind::TaskRequeued { id, .. }
            | EventKind::TaskDiscarded { id, .. } => Some(*id),
            EventKind::DispatcherStopped { .. } => None,
        }
    }

    /// Completed or discarded: nothing further will happen to the item.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::TaskCompleted { .. } | EventKind::TaskDiscarded { .. }
        )
    }
}

/// Why an item was dropped without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Handler failed and retry was off globally or for this item.
    RetryDisabled,
    /// Handler kept failing past the maximum retry count.
    RetriesExhausted,
    /// No handler instance could be resolved at dispatch time.
    Unresolved,
    /// The queue was closed before the retry could be enqueued.
    QueueClosed,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscardReason::RetryDisabled => "retry_disabled",
            DiscardReason::RetriesExhausted => "retries_exhausted",
            DiscardReason::Unresolved => "unresolved",
            DiscardReason::QueueClosed => "queue_closed",
        };
        write!(f, "{s}")
    }
}

/// Fan-out of dispatcher events to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events; the dispatcher never
/// waits on them.
pub(crate) struct EventStream {
    tx: broadcast::Sender<Event>,
    next_seq: Mutex<u64>,
}

impl EventStream {
    pub(crate) fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            next_seq: Mutex::new(1),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        // Sequence assignment and send happen under one lock so subscribers
        // always observe increasing `seq`.
        let mut seq = self
            .next_seq
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let event = Event {
            seq: *seq,
            timestamp: Utc::now(),
            kind,
        };
        *seq += 1;
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
