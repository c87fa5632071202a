//! Task execution span helpers.

use crate::model::{HandlerKind, WorkId};
use tracing::Span;

/// Start a span covering one execution attempt of a work item.
///
/// `task.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_task_span(kind: &HandlerKind, id: WorkId, attempt: u32) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.handler" = kind.handler_name,
        "task.request" = kind.request_name,
        "task.id" = %id.0,
        "task.attempt" = attempt,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record how the attempt ended ("completed", "failed", "unresolved").
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
}
