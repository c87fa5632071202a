//! Core data model.
//!
//! A work item is one deferred unit of work: a payload, the handler kind
//! resolved for it at enqueue time, a cancellation token and whether it may
//! be retried. Its identity is a generated [`WorkId`], never its content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Requests and payloads
// ---------------------------------------------------------------------------

/// Marker for types that can be sent as background work.
///
/// Exactly one [`TaskHandler`](crate::handler::TaskHandler) may be registered
/// per request type.
pub trait TaskRequest: Send + Sync + 'static {}

/// Type-erased, shared request data carried by a work item.
///
/// Cloning a payload is cheap and keeps pointing at the same request
/// instance.
#[derive(Clone)]
pub struct Payload {
    inner: Arc<dyn Any + Send + Sync>,
    request_type: TypeId,
    request_name: &'static str,
}

impl Payload {
    pub fn new<R: TaskRequest>(request: R) -> Self {
        Self::from_arc(Arc::new(request))
    }

    /// Wrap an already shared request without copying it.
    pub fn from_arc<R: TaskRequest>(request: Arc<R>) -> Self {
        Self {
            inner: request,
            request_type: TypeId::of::<R>(),
            request_name: std::any::type_name::<R>(),
        }
    }

    /// Runtime type of the wrapped request.
    pub fn request_type(&self) -> TypeId {
        self.request_type
    }

    pub fn request_name(&self) -> &'static str {
        self.request_name
    }

    /// Recover the typed request. `None` if `R` is not the wrapped type.
    pub fn downcast<R: TaskRequest>(&self) -> Option<Arc<R>> {
        Arc::clone(&self.inner).downcast::<R>().ok()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("request", &self.request_name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Handler kind
// ---------------------------------------------------------------------------

/// Which handler processes a payload. Fixed when the work item is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKind {
    pub request: TypeId,
    pub request_name: &'static str,
    pub handler_name: &'static str,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handler_name)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work travelling through the queue.
///
/// Not `Clone`: an item re-enters the queue only by being moved back by the
/// dispatcher's retry path, which keeps its [`WorkId`] and therefore its
/// retry history.
#[derive(Debug)]
pub struct WorkItem {
    id: WorkId,
    payload: Payload,
    kind: HandlerKind,
    retry_enabled: bool,
    cancel: CancellationToken,
    enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        payload: Payload,
        kind: HandlerKind,
        retry_enabled: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: WorkId::new(),
            payload,
            kind,
            retry_enabled,
            cancel,
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    pub fn retry_enabled(&self) -> bool {
        self.retry_enabled
    }

    /// Token shared with the producer; handed to the handler on every attempt.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Per-send options for [`TaskProvider::send_with`](crate::provider::TaskProvider::send_with).
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub(crate) retry: bool,
    pub(crate) cancel: Option<CancellationToken>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opt this item into retry. Only honoured when the dispatcher has retry
    /// enabled as well.
    pub fn retry(mut self, enabled: bool) -> Self {
        self.retry = enabled;
        self
    }

    /// Token that aborts a blocked enqueue and is passed on to the handler.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping(u32);
    impl TaskRequest for Ping {}

    #[derive(Debug)]
    struct Pong;
    impl TaskRequest for Pong {}

    #[test]
    fn payload_downcasts_only_to_its_own_type() {
        let payload = Payload::new(Ping(7));
        assert_eq!(payload.request_type(), TypeId::of::<Ping>());
        assert_eq!(payload.downcast::<Ping>().map(|p| p.0), Some(7));
        assert!(payload.downcast::<Pong>().is_none());
    }

    #[test]
    fn payload_clone_shares_the_request() {
        let shared = Arc::new(Ping(1));
        let payload = Payload::from_arc(Arc::clone(&shared));
        let copy = payload.clone();
        let back = copy.downcast::<Ping>().expect("downcast");
        assert!(Arc::ptr_eq(&shared, &back));
    }

    #[test]
    fn equal_work_items_get_distinct_ids() {
        let kind = HandlerKind {
            request: TypeId::of::<Ping>(),
            request_name: "Ping",
            handler_name: "PingHandler",
        };
        let token = CancellationToken::new();
        let a = WorkItem::new(Payload::new(Ping(1)), kind, false, token.clone());
        let b = WorkItem::new(Payload::new(Ping(1)), kind, false, token);
        assert_ne!(a.id(), b.id());
    }
}
