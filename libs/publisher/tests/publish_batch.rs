use std::sync::Arc;
use std::time::Duration;

use event_publisher::codec::{self, TopicSchema};
use event_publisher::media::MEDIA_PROCESSING_SCHEMA;
use event_publisher::{
    EventPublisher, MediaJob, MediaJobOutcome, MediaJobQueue, ProducerPool, PublishError,
    RetryPolicy, SchemaRegistryCache,
};
use reelz_api::{DeliveryOutcome, ErrorKind, OneOrMany, OutboxMessage, PostId};
use storage_memory::{FailurePlan, MemoryBroker, MemorySchemaRegistry};

struct Harness {
    broker: MemoryBroker,
    registry: Arc<MemorySchemaRegistry>,
    publisher: Arc<EventPublisher>,
}

fn harness(max_attempts: u32) -> Harness {
    let broker = MemoryBroker::new();
    let registry = Arc::new(MemorySchemaRegistry::new());
    let pool = ProducerPool::open(Arc::new(broker.clone()));
    let schemas = Arc::new(SchemaRegistryCache::new(registry.clone()));
    let retry = RetryPolicy { max_attempts, ..RetryPolicy::default() };
    let publisher = Arc::new(EventPublisher::new(pool, schemas, retry));
    Harness { broker, registry, publisher }
}

fn messages(n: usize) -> Vec<OutboxMessage> {
    (0..n)
        .map(|i| OutboxMessage::json(&serde_json::json!({"seq": i})).unwrap().with_key(i.to_string()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn transient_failures_then_delivered_in_order() {
    let h = harness(3);
    h.broker.fail_first(2).await;
    let batch = messages(4);

    let outcome = h
        .publisher
        .publish_batch("p", "app_events_PostLiked", &batch, None, Some("app_events_PostLiked-dlq"))
        .await
        .unwrap();

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    let calls = h.broker.calls().await;
    assert_eq!(calls.len(), 3);
    let successes: Vec<_> = calls.iter().filter(|c| c.delivered).collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].messages, batch);
    assert!(h.broker.calls_to("app_events_PostLiked-dlq").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_go_to_dead_letter_once() {
    let h = harness(3);
    h.broker
        .set_plan(FailurePlan {
            always: true,
            healthy_topics: ["x-dlq".to_string()].into(),
            ..FailurePlan::default()
        })
        .await;
    let batch = vec![OutboxMessage::new(b"payload".to_vec()).with_header("x-trace-id", "abc")];

    let outcome = h.publisher.publish_batch("p", "x", &batch, None, Some("x-dlq")).await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::DeadLettered);
    assert_eq!(h.broker.calls_to("x").await.len(), 3);
    let dlq = h.broker.calls_to("x-dlq").await;
    assert_eq!(dlq.len(), 1);
    let msg = &dlq[0].messages[0];
    assert_eq!(msg.value, b"payload");
    assert_eq!(msg.headers["x-attempts"], "3");
    assert_eq!(msg.headers["x-original-topic"], "x");
    assert_eq!(msg.headers["x-error-type"], "io");
    assert_eq!(msg.headers["x-trace-id"], "abc");
    assert!(!msg.headers["x-failure-reason"].is_empty());
    assert!(msg.headers.contains_key("x-timestamp"));
}

#[tokio::test(start_paused = true)]
async fn dead_letter_failure_surfaces_original_error() {
    let h = harness(2);
    h.broker.fail_always().await;

    let err = h
        .publisher
        .publish_batch("p", "x", &messages(1), None, Some("x-dlq"))
        .await
        .unwrap_err();

    match err {
        PublishError::Delivery { topic, attempts, source } => {
            assert_eq!(topic, "x");
            assert_eq!(attempts, 2);
            assert!(source.message().starts_with("x:"), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.broker.calls_to("x-dlq").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_dead_letter_topic_propagates_after_retries() {
    let h = harness(3);
    h.broker.fail_always().await;

    let err = h.publisher.publish_batch("p", "x", &messages(1), None, None).await.unwrap_err();
    assert!(matches!(err, PublishError::Delivery { attempts: 3, .. }));
    assert_eq!(h.broker.calls().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_send_error_is_not_retried() {
    let h = harness(3);
    h.broker
        .set_plan(FailurePlan { fail_first: 1, permanent: true, ..FailurePlan::default() })
        .await;

    let outcome = h.publisher.publish_batch("p", "x", &messages(1), None, Some("x-dlq")).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::DeadLettered);
    let dlq = h.broker.calls_to("x-dlq").await;
    assert_eq!(dlq[0].messages[0].headers["x-attempts"], "1");
    assert_eq!(dlq[0].messages[0].headers["x-error-type"], "format");
}

#[tokio::test(start_paused = true)]
async fn backoff_waits_between_attempts() {
    let h = harness(3);
    h.broker.fail_first(2).await;
    let started = tokio::time::Instant::now();

    h.publisher.publish_batch("p", "x", &messages(1), None, None).await.unwrap();

    // 100ms + 200ms base, each with up to 100ms jitter
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(500), "{elapsed:?}");
}

#[tokio::test]
async fn schema_encoding_resolves_once_per_subject() {
    let h = harness(3);
    let schema = TopicSchema::parse(MEDIA_PROCESSING_SCHEMA).unwrap();
    let job = MediaJob::new(PostId::new(), OneOrMany::MultipleItems(vec!["s3://a".into(), "s3://b".into()]), "image");
    let msg = OutboxMessage::json(&serde_json::to_value(&job).unwrap()).unwrap();

    for _ in 0..3 {
        h.publisher
            .publish_batch("mediaProducer", "media_processing", std::slice::from_ref(&msg), Some(&schema), None)
            .await
            .unwrap();
    }

    assert_eq!(h.registry.calls(), 1);
    let id = h.publisher.schemas().cached("media_processing").await.unwrap();
    let delivered = h.broker.delivered("media_processing").await;
    assert_eq!(delivered.len(), 3);
    let wire = &delivered[0].value;
    assert_eq!(wire[0], codec::MAGIC_BYTE);
    assert_eq!(&wire[1..5], &id.to_be_bytes());
    let expected = codec::encode(&schema, id, &serde_json::to_value(&job).unwrap()).unwrap();
    assert_eq!(wire, &expected);
}

#[tokio::test]
async fn invalidate_forces_reregistration() {
    let h = harness(3);
    let schema = TopicSchema::parse(MEDIA_PROCESSING_SCHEMA).unwrap();
    let cache = h.publisher.schemas();

    let first = cache.resolve("media_processing", &schema).await.unwrap();
    assert!(cache.invalidate("media_processing").await);
    assert!(!cache.invalidate("media_processing").await);
    let second = cache.resolve("media_processing", &schema).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.registry.calls(), 2);
}

#[tokio::test]
async fn encoding_failure_never_reaches_broker() {
    let h = harness(3);
    let schema = TopicSchema::parse(MEDIA_PROCESSING_SCHEMA).unwrap();
    let bad = OutboxMessage::json(&serde_json::json!({"toProcessUrls": "not-an-array"})).unwrap();

    let err = h
        .publisher
        .publish_batch("p", "media_processing", &[bad], Some(&schema), Some("media_processing-dlq"))
        .await
        .unwrap_err();

    assert!(err.is_encoding());
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(h.broker.calls().await.is_empty());
}

#[tokio::test]
async fn registry_outage_aborts_without_dead_letter() {
    let h = harness(3);
    h.registry.set_unavailable(true);
    let schema = TopicSchema::parse(MEDIA_PROCESSING_SCHEMA).unwrap();

    let err = h
        .publisher
        .publish_batch("p", "media_processing", &messages(1), Some(&schema), Some("media_processing-dlq"))
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::Registry { ref subject, .. } if subject == "media_processing-value"));
    assert!(h.broker.calls().await.is_empty());
}

#[tokio::test]
async fn pool_reuses_named_producers_and_shuts_down() {
    let h = harness(3);
    let pool = h.publisher.pool().clone();

    let (a, b) = tokio::join!(pool.get("outboxRelay"), pool.get("outboxRelay"));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    pool.get("mediaProducer").await.unwrap();
    assert_eq!(pool.len().await, 2);

    pool.shutdown_all().await.unwrap();
    assert!(pool.is_empty().await);
    assert_eq!(h.broker.disconnects(), h.broker.connects());
    assert!(matches!(pool.get("outboxRelay").await, Err(PublishError::PoolClosed)));
    assert!(matches!(
        h.publisher.publish_batch("outboxRelay", "x", &messages(1), None, None).await,
        Err(PublishError::PoolClosed)
    ));
}

#[tokio::test]
async fn connect_failure_is_reported_per_producer() {
    let h = harness(3);
    h.broker.fail_connect(true);
    let err = h.publisher.publish_batch("p", "x", &messages(1), None, None).await.unwrap_err();
    assert!(matches!(err, PublishError::Connect { ref name, .. } if name == "p"));
}

#[tokio::test(start_paused = true)]
async fn media_job_outcomes() {
    let h = harness(3);
    let queue = MediaJobQueue::new(h.publisher.clone()).unwrap();
    let job = MediaJob::new(PostId::new(), OneOrMany::SingleItem("s3://a".into()), "video");

    assert_eq!(queue.enqueue(&job).await.unwrap(), MediaJobOutcome::Queued);
    let sent = h.broker.delivered("media_processing").await;
    assert_eq!(sent[0].headers["x-trace-id"], job.trace_id.to_string());

    h.broker.fail_topic("media_processing").await;
    assert_eq!(queue.enqueue(&job).await.unwrap(), MediaJobOutcome::Degraded);
    assert_eq!(h.broker.delivered("media_processing-dlq").await.len(), 1);
}
