//! Integration tests for the retry ledger.

use std::sync::Arc;
use taskq::WorkId;
use taskq::engine::{RetryDecision, RetryLedger};

#[test]
fn failures_requeue_until_the_limit_then_exhaust() {
    let ledger = RetryLedger::new(3);
    let id = WorkId::new();

    for expected in 1..=3 {
        assert_eq!(
            ledger.record_failure(id),
            RetryDecision::Requeue { failures: expected }
        );
        assert_eq!(ledger.failures(id), expected);
    }
    assert_eq!(
        ledger.record_failure(id),
        RetryDecision::Exhausted { failures: 4 }
    );
    assert_eq!(ledger.failures(id), 0);
    assert!(ledger.is_empty());
}

#[test]
fn items_are_counted_independently() {
    let ledger = RetryLedger::new(3);
    let a = WorkId::new();
    let b = WorkId::new();

    ledger.record_failure(a);
    ledger.record_failure(a);
    ledger.record_failure(b);

    assert_eq!(ledger.failures(a), 2);
    assert_eq!(ledger.failures(b), 1);
    assert_eq!(ledger.len(), 2);

    assert_eq!(ledger.clear(a), Some(2));
    assert_eq!(ledger.clear(a), None);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn concurrent_failures_lose_no_increments() {
    let ledger = Arc::new(RetryLedger::new(10_000));
    let id = WorkId::new();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    ledger.record_failure(id);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(ledger.failures(id), 800);
}
