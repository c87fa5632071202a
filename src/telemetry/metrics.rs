//! Metric instrument factories for taskq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: work items accepted by the provider.
/// Labels: `request`.
pub fn tasks_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.enqueued")
        .with_description("Number of tasks sent to the queue")
        .build()
}

/// Counter: queue-level operations.
/// Labels: `operation` ("enqueue" | "dequeue").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: handler executions that succeeded.
/// Labels: `handler`.
pub fn tasks_completed() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.completed")
        .with_description("Number of tasks whose handler succeeded")
        .build()
}

/// Counter: handler executions that failed (each attempt counts).
/// Labels: `handler`.
pub fn tasks_failed() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.failed")
        .with_description("Number of failed handler executions")
        .build()
}

/// Counter: items put back on the queue for another attempt.
/// Labels: `handler`.
pub fn tasks_requeued() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.requeued")
        .with_description("Number of tasks re-enqueued for retry")
        .build()
}

/// Counter: items dropped without completing.
/// Labels: `handler`, `reason`.
pub fn tasks_discarded() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.discarded")
        .with_description("Number of tasks discarded")
        .build()
}

/// Histogram: handler execution time in milliseconds.
/// Labels: `handler`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.task.duration_ms")
        .with_description("Handler execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
