//! Integration tests for handler registration and resolution.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use taskq::error::Error;
use taskq::{HandlerRegistry, HandlerResolver, Payload, TaskHandler, TaskRequest};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Ping(u32);
impl TaskRequest for Ping {}

#[derive(Debug)]
struct Pong;
impl TaskRequest for Pong {}

#[derive(Default)]
struct PingHandler;

#[async_trait]
impl TaskHandler<Ping> for PingHandler {
    async fn handle(&self, request: Arc<Ping>, _cancel: CancellationToken) -> anyhow::Result<()> {
        anyhow::ensure!(request.0 > 0, "ping must be positive");
        Ok(())
    }
}

#[derive(Default)]
struct OtherPingHandler;

#[async_trait]
impl TaskHandler<Ping> for OtherPingHandler {
    async fn handle(&self, _request: Arc<Ping>, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn second_handler_for_a_request_is_ambiguous() {
    let mut registry = HandlerRegistry::empty();
    registry.register_default::<Ping, PingHandler>().unwrap();

    let result = registry.register_default::<Ping, OtherPingHandler>();
    match result {
        Err(e @ Error::AmbiguousHandler { .. }) => {
            assert!(e.is_resolution());
            assert!(e.to_string().contains("OtherPingHandler"));
        }
        other => panic!("expected AmbiguousHandler, got {other:?}"),
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn kind_for_names_the_registered_handler() {
    let mut registry = HandlerRegistry::empty();
    registry.register_default::<Ping, PingHandler>().unwrap();

    let kind = registry.kind_for(&Payload::new(Ping(1))).unwrap();
    assert_eq!(kind.handler_name, std::any::type_name::<PingHandler>());
    assert_eq!(kind.request_name, std::any::type_name::<Ping>());

    assert!(matches!(
        registry.kind_for(&Payload::new(Pong)),
        Err(Error::HandlerNotFound { .. })
    ));
}

// ---------------------------------------------------------------------------
// Instantiation
// ---------------------------------------------------------------------------

#[test]
fn every_instantiation_builds_a_fresh_handler() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::empty();
    let counter = Arc::clone(&built);
    registry
        .register::<Ping, _, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            PingHandler
        })
        .unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let kind = registry.kind_for(&Payload::new(Ping(1))).unwrap();
    let _first = registry.instantiate(&kind).unwrap();
    let _second = registry.instantiate(&kind).unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn erased_handler_invokes_the_typed_one() {
    let mut registry = HandlerRegistry::empty();
    registry.register_default::<Ping, PingHandler>().unwrap();
    let kind = registry.kind_for(&Payload::new(Ping(1))).unwrap();
    let handler = registry.instantiate(&kind).unwrap();

    assert!(handler.name().ends_with("PingHandler"));
    handler
        .invoke(Payload::new(Ping(5)), CancellationToken::new())
        .await
        .unwrap();

    let failed = handler
        .invoke(Payload::new(Ping(0)), CancellationToken::new())
        .await;
    assert!(failed.is_err());

    let mismatched = handler
        .invoke(Payload::new(Pong), CancellationToken::new())
        .await;
    assert!(mismatched.is_err());
}

#[test]
fn instantiate_rejects_a_kind_from_another_registry() {
    let mut first = HandlerRegistry::empty();
    first.register_default::<Ping, PingHandler>().unwrap();
    let mut second = HandlerRegistry::empty();
    second.register_default::<Ping, OtherPingHandler>().unwrap();

    let kind = first.kind_for(&Payload::new(Ping(1))).unwrap();
    assert!(matches!(
        second.instantiate(&kind),
        Err(Error::HandlerNotFound { .. })
    ));
}
