//! Integration tests for the producer API.

use async_trait::async_trait;
use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;
use taskq::error::Error;
use taskq::queue::BoundedQueue;
use taskq::{HandlerRegistry, Payload, SendOptions, TaskHandler, TaskProvider, TaskRequest};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Ping(u32);
impl TaskRequest for Ping {}

#[derive(Debug)]
struct Unregistered;
impl TaskRequest for Unregistered {}

#[derive(Default)]
struct PingHandler;

#[async_trait]
impl TaskHandler<Ping> for PingHandler {
    async fn handle(&self, _request: Arc<Ping>, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

fn setup(capacity: usize) -> (TaskProvider, BoundedQueue) {
    let mut registry = HandlerRegistry::empty();
    registry.register_default::<Ping, PingHandler>().unwrap();
    let queue = BoundedQueue::new(capacity).unwrap();
    let provider = TaskProvider::new(queue.clone(), Arc::new(registry));
    (provider, queue)
}

// ---------------------------------------------------------------------------
// Argument and resolution errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_payload_is_invalid_regardless_of_retry() {
    let (provider, queue) = setup(4);

    for retry in [false, true] {
        let result = provider
            .send_with(None, SendOptions::new().retry(retry))
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
    assert!(queue.is_empty());
}

#[tokio::test]
async fn unregistered_request_is_rejected_before_enqueue() {
    let (provider, queue) = setup(4);

    let result = provider.send(Unregistered).await;
    match result {
        Err(e @ Error::HandlerNotFound { .. }) => assert!(e.is_resolution()),
        other => panic!("expected HandlerNotFound, got {other:?}"),
    }
    assert!(queue.is_empty());
}

// ---------------------------------------------------------------------------
// Enqueued work items
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueued_item_carries_the_exact_payload_and_kind() {
    let (provider, queue) = setup(4);
    let request = Arc::new(Ping(42));

    let id = provider
        .send_with(
            Some(Payload::from_arc(Arc::clone(&request))),
            SendOptions::new(),
        )
        .await
        .unwrap();

    let item = queue.dequeue(&CancellationToken::new()).await.unwrap();
    assert_eq!(item.id(), id);
    let delivered = item.payload().downcast::<Ping>().unwrap();
    assert!(Arc::ptr_eq(&request, &delivered));
    assert_eq!(item.kind().request, TypeId::of::<Ping>());
    assert_eq!(item.kind().handler_name, std::any::type_name::<PingHandler>());
}

#[tokio::test]
async fn retry_flag_is_recorded_per_item() {
    let (provider, queue) = setup(4);
    let never = CancellationToken::new();

    provider.send(Ping(1)).await.unwrap();
    provider.send_with_retry(Ping(2), true).await.unwrap();
    provider.send_with_retry(Ping(3), false).await.unwrap();

    let flags: Vec<bool> = [
        queue.dequeue(&never).await.unwrap(),
        queue.dequeue(&never).await.unwrap(),
        queue.dequeue(&never).await.unwrap(),
    ]
    .iter()
    .map(|item| item.retry_enabled())
    .collect();
    assert_eq!(flags, vec![false, true, false]);
}

#[tokio::test]
async fn equal_requests_become_distinct_items() {
    let (provider, _queue) = setup(4);
    let a = provider.send(Ping(1)).await.unwrap();
    let b = provider.send(Ping(1)).await.unwrap();
    assert_ne!(a, b);
}

// ---------------------------------------------------------------------------
// Backpressure and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_waits_while_the_queue_is_full() {
    let (provider, queue) = setup(1);
    provider.send(Ping(1)).await.unwrap();

    let blocked = tokio::time::timeout(Duration::from_millis(50), provider.send(Ping(2))).await;
    assert!(blocked.is_err());
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn cancelled_send_reports_cancellation() {
    let (provider, queue) = setup(1);
    provider.send(Ping(1)).await.unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = provider
        .send_with(Some(Payload::new(Ping(2))), SendOptions::new().cancel(token))
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn send_token_travels_with_the_item() {
    let (provider, queue) = setup(2);
    let token = CancellationToken::new();

    provider
        .send_with(
            Some(Payload::new(Ping(1))),
            SendOptions::new().cancel(token.clone()),
        )
        .await
        .unwrap();

    let item = queue.dequeue(&CancellationToken::new()).await.unwrap();
    assert!(!item.cancel_token().is_cancelled());
    token.cancel();
    assert!(item.cancel_token().is_cancelled());
}

#[tokio::test]
async fn send_after_close_fails() {
    let (provider, queue) = setup(2);
    queue.close();
    assert!(matches!(provider.send(Ping(1)).await, Err(Error::QueueClosed)));
}
