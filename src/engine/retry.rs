//! Retry ledger: consecutive failure counts per work item.

use crate::model::WorkId;
use std::collections::HashMap;
use std::sync::Mutex;

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the item back; `failures` attempts have failed so far.
    Requeue { failures: u32 },
    /// Over the limit. The ledger entry is already gone.
    Exhausted { failures: u32 },
}

/// Failure counts keyed by [`WorkId`].
///
/// Every update is a single locked read-modify-write, so concurrent
/// failures of different (or the same) items never lose an increment.
#[derive(Debug)]
pub struct RetryLedger {
    max_retries: u32,
    counts: Mutex<HashMap<WorkId, u32>>,
}

impl RetryLedger {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Count one more failure for `id` and decide whether it may run again.
    ///
    /// An item is re-enqueued while its failure count is at most
    /// `max_retries`; the failure after that removes the entry.
    pub fn record_failure(&self, id: WorkId) -> RetryDecision {
        let mut counts = self.lock();
        let failures = {
            let count = counts.entry(id).or_insert(0);
            *count += 1;
            *count
        };

        if failures <= self.max_retries {
            RetryDecision::Requeue { failures }
        } else {
            counts.remove(&id);
            RetryDecision::Exhausted { failures }
        }
    }

    /// Forget `id`, returning its last failure count.
    pub fn clear(&self, id: WorkId) -> Option<u32> {
        self.lock().remove(&id)
    }

    /// Failures recorded so far for `id` (0 if none).
    pub fn failures(&self, id: WorkId) -> u32 {
        self.lock().get(&id).copied().unwrap_or(0)
    }

    /// Number of items currently carrying a failure count.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WorkId, u32>> {
        // The map holds plain counters; a panic mid-update cannot leave it
        // inconsistent.
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
