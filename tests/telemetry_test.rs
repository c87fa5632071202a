//! Integration tests for telemetry initialization and span helpers.

use std::any::TypeId;
use taskq::WorkId;
use taskq::model::HandlerKind;
use taskq::telemetry::{TelemetryConfig, init_telemetry, metrics, task};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so a second
    // init may return Err; that is acceptable here.
    let config = TelemetryConfig::new("taskq-test");
    assert!(config.endpoint.is_none());
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn task_span_creates_and_records_outcome() {
    let kind = HandlerKind {
        request: TypeId::of::<u32>(),
        request_name: "u32",
        handler_name: "NumberHandler",
    };
    let span = task::start_task_span(&kind, WorkId::new(), 1);
    task::record_outcome(&span, "completed");
}

#[test]
fn metric_instruments_work_without_a_provider() {
    use opentelemetry::KeyValue;

    metrics::tasks_enqueued().add(1, &[KeyValue::new("request", "u32")]);
    metrics::tasks_discarded().add(
        1,
        &[
            KeyValue::new("handler", "NumberHandler"),
            KeyValue::new("reason", "unresolved"),
        ],
    );
    metrics::task_duration_ms().record(12.5, &[]);
}
