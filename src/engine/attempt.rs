//! One execution attempt: resolve a fresh handler, run it, classify the result.

use crate::error::Error;
use crate::handler::HandlerResolver;
use crate::model::WorkItem;
use std::time::Instant;
use tracing::{Instrument, debug};

/// Result of running one attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Completed { duration_ms: u64 },
    /// The handler returned an error or panicked.
    Failed { error: Error, duration_ms: u64 },
    /// No handler instance could be built. Structural, never retried.
    Unresolved { error: Error },
}

/// Run `item` once against a freshly instantiated handler.
///
/// The handler runs on its own task so that a panic is reported as a
/// failure instead of tearing down the caller.
pub async fn run(resolver: &dyn HandlerResolver, item: &WorkItem) -> AttemptOutcome {
    let handler = match resolver.instantiate(item.kind()) {
        Ok(handler) => handler,
        Err(error) => return AttemptOutcome::Unresolved { error },
    };

    let name = handler.name();
    let payload = item.payload().clone();
    let cancel = item.cancel_token().clone();
    debug!(work_id = %item.id(), handler = name, "invoking handler");

    let start = Instant::now();
    let joined = tokio::spawn(
        async move { handler.invoke(payload, cancel).await }.in_current_span(),
    )
    .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match joined {
        Ok(Ok(())) => AttemptOutcome::Completed { duration_ms },
        Ok(Err(source)) => AttemptOutcome::Failed {
            error: Error::Handler {
                handler: name.to_string(),
                source,
            },
            duration_ms,
        },
        Err(e) if e.is_panic() => AttemptOutcome::Failed {
            error: Error::HandlerPanicked {
                handler: name.to_string(),
            },
            duration_ms,
        },
        Err(e) => AttemptOutcome::Failed {
            error: Error::Other(format!("handler task for {name} did not finish: {e}")),
            duration_ms,
        },
    }
}
