mod common;

use common::{collect_then_stop, msg, ok_until_ko, within, RecordingSink};
use async_trait::async_trait;
use dispatch_queue::adapters::sqs::{decode_body, encode_body, QueueAddress, SqsApi, SqsMessage};
use dispatch_queue::adapters::{SqsQueue, SqsQueueConfig};
use dispatch_queue::in_memory::{InMemorySqs, InMemorySqsConfig};
use dispatch_queue::{
    shutdown_channel, BackendKind, ErrorKind, NullSink, PersistentQueue, Queue, QueueError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const VISIBILITY: Duration = Duration::from_millis(200);

fn service() -> InMemorySqs {
    InMemorySqs::new(InMemorySqsConfig::default().with_visibility_timeout(VISIBILITY))
}

async fn connected(sqs: &InMemorySqs, name: &str) -> SqsQueue<InMemorySqs> {
    sqs.create_queue(name);
    SqsQueue::connect_with_sink(
        sqs.clone(),
        SqsQueueConfig::new(name).with_wait_time(Duration::from_millis(20)),
        Arc::new(NullSink),
    )
    .await
    .expect("queue resolves")
}

#[tokio::test]
async fn missing_queue_is_not_found_at_construction() {
    let sqs = service();
    let err = SqsQueue::connect(sqs, SqsQueueConfig::new("testDispatch"))
        .await
        .err()
        .expect("lookup should fail");

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, QueueError::NotFound(ref name) if name == "testDispatch"));
}

#[tokio::test]
async fn resolves_the_queue_url_once() {
    let sqs = service();
    let queue = connected(&sqs, "testDispatch").await;
    assert_eq!(queue.queue_url(), "memory://testDispatch");
    assert_eq!(queue.address().name, "testDispatch");
    assert_eq!(queue.name(), "testDispatch");
    assert_eq!(queue.kind(), BackendKind::Sqs);
}

#[tokio::test]
async fn bodies_travel_as_base64() {
    let sqs = service();
    let queue = connected(&sqs, "wire").await;
    let payload = [0u8, 159, 146, 150, 255];
    queue.send_bytes(&payload).await.unwrap();

    let raw = sqs
        .receive_messages(queue.address(), 1, Duration::ZERO)
        .await
        .unwrap();
    let body = raw[0].body.clone().unwrap();
    assert_eq!(body, encode_body(&payload));
    assert_eq!(decode_body(&body).unwrap(), payload);
}

#[tokio::test]
async fn arbitrary_bytes_round_trip() {
    let sqs = service();
    let queue = connected(&sqs, "bytes").await;
    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        (0..=255u8).collect(),
        (0..=255u8).rev().cycle().take(3000).collect(),
        msg("a random message"),
    ];
    for payload in &payloads {
        queue.send_bytes(payload).await.unwrap();
    }

    let (trigger, shutdown) = shutdown_channel();
    let (listener, seen) = collect_then_stop(payloads.len(), trigger);
    within(queue.listen_until(listener, shutdown)).await.unwrap();

    assert_eq!(*seen.lock(), payloads);
    assert_eq!(sqs.message_count("bytes"), 0);
}

#[tokio::test]
async fn ok_then_ko_leaves_the_failed_message_undeleted() {
    let sqs = service();
    let queue = connected(&sqs, "test").await;
    queue.send_bytes(&msg("ok")).await.unwrap();
    queue.send_bytes(&msg("ko")).await.unwrap();

    let (listener, mut signals) = ok_until_ko();
    let err = within(queue.listen(listener)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Handler);
    assert_eq!(signals.recv().await, Some(true));
    assert!(signals.try_recv().is_err());

    assert_eq!(sqs.message_count("test"), 1);
    assert_eq!(sqs.visible_count("test"), 0);
}

#[tokio::test]
async fn failed_message_returns_after_visibility_timeout() {
    let sqs = service();
    let queue = connected(&sqs, "retry").await;
    queue.send_bytes(&msg("ok")).await.unwrap();
    queue.send_bytes(&msg("ko")).await.unwrap();

    let (listener, _signals) = ok_until_ko();
    within(queue.listen(listener)).await.unwrap_err();

    let (trigger, shutdown) = shutdown_channel();
    let (listener, seen) = collect_then_stop(1, trigger);
    within(queue.listen_until(listener, shutdown)).await.unwrap();

    // Only the failed message comes back; the acknowledged one was deleted.
    assert_eq!(*seen.lock(), vec![msg("ko")]);
    assert_eq!(sqs.message_count("retry"), 0);
}

#[tokio::test]
async fn failed_message_is_not_redelivered_before_timeout() {
    let sqs = InMemorySqs::new(
        InMemorySqsConfig::default().with_visibility_timeout(Duration::from_secs(60)),
    );
    let queue = connected(&sqs, "hidden").await;
    queue.send_bytes(&msg("ko")).await.unwrap();

    let (listener, _signals) = ok_until_ko();
    within(queue.listen(listener)).await.unwrap_err();

    let (trigger, shutdown) = shutdown_channel();
    let (listener, seen) = collect_then_stop(1, trigger);
    let outcome =
        tokio::time::timeout(Duration::from_millis(100), queue.listen_until(listener, shutdown))
            .await;
    assert!(outcome.is_err());
    assert!(seen.lock().is_empty());
    assert_eq!(sqs.message_count("hidden"), 1);
}

#[tokio::test]
async fn undecodable_body_stops_listen() {
    let sqs = service();
    let queue = connected(&sqs, "garbled").await;
    sqs.push_raw_body("garbled", "%%% not base64 %%%");

    let (listener, mut signals) = ok_until_ko();
    let err = within(queue.listen(listener)).await.unwrap_err();

    assert!(matches!(err, QueueError::Decode { .. }));
    assert!(signals.try_recv().is_err());
    assert_eq!(sqs.message_count("garbled"), 1);
}

#[tokio::test]
async fn failed_delete_stops_listen() {
    let sqs = service();
    let queue = connected(&sqs, "sticky").await;
    queue.send_bytes(&msg("ok")).await.unwrap();
    sqs.fail_deletes(true);

    let (listener, mut signals) = ok_until_ko();
    let err = within(queue.listen(listener)).await.unwrap_err();

    assert!(matches!(err, QueueError::Delete { ref queue, .. } if queue == "sticky"));
    assert!(err.to_string().starts_with("delete on sticky failed"));
    assert_eq!(signals.recv().await, Some(true));
    assert_eq!(sqs.message_count("sticky"), 1);
}

#[tokio::test]
async fn purge_empties_the_queue() {
    for count in [0usize, 1, 30] {
        let sqs = service();
        let queue = connected(&sqs, "purged").await;
        for i in 0..count {
            queue.send_bytes(format!("m{i}").as_bytes()).await.unwrap();
        }
        assert_eq!(sqs.message_count("purged"), count);

        queue.purge().await.unwrap();
        assert_eq!(sqs.message_count("purged"), 0);
        assert!(sqs
            .receive_messages(queue.address(), 1, Duration::ZERO)
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn rapid_purges_are_rate_limited() {
    let sqs = InMemorySqs::new(
        InMemorySqsConfig::default().with_purge_cooldown(Duration::from_secs(60)),
    );
    let queue = connected(&sqs, "busy").await;
    queue.purge().await.unwrap();

    let err = queue.purge().await.unwrap_err();
    assert!(matches!(err, QueueError::RateLimited(ref name) if name == "busy"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn shutdown_ends_an_idle_listener_cleanly() {
    let sqs = service();
    let sink = Arc::new(RecordingSink::default());
    sqs.create_queue("idle");
    let queue = SqsQueue::connect_with_sink(
        sqs.clone(),
        SqsQueueConfig::new("idle").with_wait_time(Duration::from_secs(20)),
        sink.clone(),
    )
    .await
    .unwrap();

    let (trigger, shutdown) = shutdown_channel();
    let (listener, seen) = collect_then_stop(usize::MAX, trigger);
    let (stop, stop_signal) = shutdown_channel();
    let queue = Arc::new(queue);
    let listening = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.listen_until(listener, stop_signal).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.trigger();
    within(listening).await.unwrap().unwrap();

    assert!(seen.lock().is_empty());
    assert!(!shutdown.is_triggered());
    assert_eq!(sink.count("ListenStopped"), 1);
}

#[tokio::test]
async fn works_behind_a_trait_object() {
    let sqs = service();
    let queue: Arc<dyn PersistentQueue> = Arc::new(connected(&sqs, "dyn").await);
    queue.send_bytes(b"via dyn").await.unwrap();

    let (trigger, shutdown) = shutdown_channel();
    let (listener, seen) = collect_then_stop(1, trigger);
    within(queue.listen_until(listener, shutdown)).await.unwrap();
    assert_eq!(*seen.lock(), vec![b"via dyn".to_vec()]);
}

/// Counts receive calls on the way through to the in-memory service.
#[derive(Clone)]
struct CountingSqs {
    inner: InMemorySqs,
    receives: Arc<AtomicUsize>,
}

#[async_trait]
impl SqsApi for CountingSqs {
    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        self.inner.queue_url(queue_name).await
    }

    async fn send_message(&self, queue: &QueueAddress, body: String) -> Result<(), QueueError> {
        self.inner.send_message(queue, body).await
    }

    async fn receive_messages(
        &self,
        queue: &QueueAddress,
        max: i32,
        wait: Duration,
    ) -> Result<Vec<SqsMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.inner.receive_messages(queue, max, wait).await
    }

    async fn delete_message(
        &self,
        queue: &QueueAddress,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        self.inner.delete_message(queue, receipt_handle).await
    }

    async fn purge_queue(&self, queue: &QueueAddress) -> Result<(), QueueError> {
        self.inner.purge_queue(queue).await
    }
}

#[tokio::test]
async fn zero_wait_polling_does_not_spin() {
    let sqs = service();
    sqs.create_queue("quiet");
    let receives = Arc::new(AtomicUsize::new(0));
    let client = CountingSqs {
        inner: sqs,
        receives: Arc::clone(&receives),
    };
    let queue = SqsQueue::connect_with_sink(
        client,
        SqsQueueConfig::new("quiet").with_wait_time(Duration::ZERO),
        Arc::new(NullSink),
    )
    .await
    .unwrap();

    let (trigger, shutdown) = shutdown_channel();
    let (listener, _seen) = collect_then_stop(1, trigger);
    let outcome =
        tokio::time::timeout(Duration::from_millis(200), queue.listen_until(listener, shutdown))
            .await;

    assert!(outcome.is_err());
    let calls = receives.load(Ordering::SeqCst);
    assert!(calls >= 1, "never polled");
    assert!(calls <= 10, "polled {calls} times in 200ms");
}
