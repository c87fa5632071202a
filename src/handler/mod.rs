//! Handler contracts and the registration table.
//!
//! A handler processes one request type. Handlers are registered at startup
//! as factories, one per request type; the dispatcher asks for a fresh
//! instance for every item it runs, so handlers may keep per-item state.

use crate::error::{Error, Result};
use crate::model::{HandlerKind, Payload, TaskRequest};
use async_trait::async_trait;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Processes requests of type `R`.
#[async_trait]
pub trait TaskHandler<R: TaskRequest>: Send + Sync + 'static {
    async fn handle(&self, request: Arc<R>, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Type-erased handler as seen by the dispatcher.
#[async_trait]
pub trait DynHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, payload: Payload, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Resolves handlers for payloads.
///
/// Called once per enqueue (`kind_for`) and once per dispatched item
/// (`instantiate`), so both must be cheap.
pub trait HandlerResolver: Send + Sync {
    /// Pick the handler kind for a payload's runtime type.
    fn kind_for(&self, payload: &Payload) -> Result<HandlerKind>;

    /// Build a fresh handler instance for `kind`.
    fn instantiate(&self, kind: &HandlerKind) -> Result<Box<dyn DynHandler>>;
}

struct Typed<R, H> {
    handler: H,
    _request: PhantomData<fn() -> R>,
}

#[async_trait]
impl<R, H> DynHandler for Typed<R, H>
where
    R: TaskRequest,
    H: TaskHandler<R>,
{
    fn name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    async fn invoke(&self, payload: Payload, cancel: CancellationToken) -> anyhow::Result<()> {
        let request = payload.downcast::<R>().ok_or_else(|| {
            anyhow::anyhow!(
                "payload {} does not match handler {}",
                payload.request_name(),
                std::any::type_name::<H>()
            )
        })?;
        self.handler.handle(request, cancel).await
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn DynHandler> + Send + Sync>;

struct Registration {
    kind: HandlerKind,
    factory: Factory,
}

/// Registry of handler factories, indexed by request type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, Registration>,
}

impl HandlerRegistry {
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register `H` as the handler for `R`, built by `build` on every
    /// dispatch.
    ///
    /// # Errors
    ///
    /// [`Error::AmbiguousHandler`] if `R` already has a handler.
    pub fn register<R, H, F>(&mut self, build: F) -> Result<&mut Self>
    where
        R: TaskRequest,
        H: TaskHandler<R>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let request = TypeId::of::<R>();
        let kind = HandlerKind {
            request,
            request_name: std::any::type_name::<R>(),
            handler_name: std::any::type_name::<H>(),
        };

        if let Some(existing) = self.handlers.get(&request) {
            return Err(Error::AmbiguousHandler {
                request: kind.request_name.to_string(),
                existing: existing.kind.handler_name.to_string(),
                duplicate: kind.handler_name.to_string(),
            });
        }

        let factory: Factory = Arc::new(move || -> Box<dyn DynHandler> {
            Box::new(Typed::<R, H> {
                handler: build(),
                _request: PhantomData,
            })
        });

        debug!(request = kind.request_name, handler = kind.handler_name, "handler registered");
        self.handlers.insert(request, Registration { kind, factory });
        Ok(self)
    }

    /// Register a handler built with `H::default()`.
    pub fn register_default<R, H>(&mut self) -> Result<&mut Self>
    where
        R: TaskRequest,
        H: TaskHandler<R> + Default,
    {
        self.register::<R, H, _>(H::default)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Look up the registered kind for a request type.
    pub fn get(&self, request: TypeId) -> Option<&HandlerKind> {
        self.handlers.get(&request).map(|r| &r.kind)
    }
}

impl HandlerResolver for HandlerRegistry {
    fn kind_for(&self, payload: &Payload) -> Result<HandlerKind> {
        self.get(payload.request_type())
            .copied()
            .ok_or_else(|| Error::HandlerNotFound {
                request: payload.request_name().to_string(),
            })
    }

    fn instantiate(&self, kind: &HandlerKind) -> Result<Box<dyn DynHandler>> {
        match self.handlers.get(&kind.request) {
            Some(registration) if registration.kind == *kind => Ok((registration.factory)()),
            _ => Err(Error::HandlerNotFound {
                request: kind.request_name.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.values().map(|r| r.kind.handler_name))
            .finish()
    }
}
