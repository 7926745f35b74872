//! Integration tests for [`RedpandaEventBus`] against a real broker.
//!
//! These tests use testcontainers to start a Kafka instance and validate:
//! - Keyed publish and poll round-trip
//! - Offset commits and resuming a consumer group
//! - The command producer and query consumer over a real log
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take 15-60 seconds each:
//! ```bash
//! cargo test -p order-pipeline-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use order_pipeline_core::config::{BrokerConfig, ConsumerSettings, OffsetReset};
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::event_bus::{CommitOffsets, EventBus, LogConsumer, LogRecord};
use order_pipeline_core::order::{CreateOrderRequest, OrderStatus};
use order_pipeline_core::producer::CommandProducer;
use order_pipeline_core::projection::OrderViewStore;
use order_pipeline_projections::{
    InMemoryOrderViewStore, OrderProjection, QueryConsumer, QueryConsumerConfig,
};
use order_pipeline_redpanda::RedpandaEventBus;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const WARMUP_KEY: &str = "warmup";

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn settings(group: &str) -> ConsumerSettings {
    ConsumerSettings {
        group_id: group.to_string(),
        client_id: format!("{group}-client"),
        auto_commit: false,
        offset_reset: OffsetReset::Earliest,
    }
}

fn bus(brokers: &str, group: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .broker_config(&BrokerConfig::new(brokers))
        .client_id("integration-tests")
        .consumer(settings(group))
        .build()
        .expect("Failed to create event bus")
}

/// Publish a warmup record until the topic exists and the broker answers.
async fn ensure_topic_exists(bus: &RedpandaEventBus, topic: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if bus.publish(topic, WARMUP_KEY, "{}").await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Topic {topic} not ready after {max_attempts} attempts"
        );
    }
}

/// Poll until `count` non-warmup records arrived.
async fn poll_until(consumer: &mut Box<dyn LogConsumer>, count: usize) -> Vec<LogRecord> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while received.len() < count {
            let batch = consumer
                .poll(Duration::from_millis(500))
                .await
                .expect("poll");
            received.extend(
                batch
                    .into_iter()
                    .filter(|r| r.key.as_deref() != Some(WARMUP_KEY)),
            );
        }
    })
    .await
    .expect("Timeout waiting for records");
    received
}

#[tokio::test]
#[ignore]
async fn test_publish_and_poll_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers, "round-trip");
    ensure_topic_exists(&bus, "orders").await;

    let mut consumer = bus.subscribe(&["orders"]).await.expect("subscribe");

    let first = bus
        .publish("orders", "1", r#"{"n":1}"#)
        .await
        .expect("publish first");
    let second = bus
        .publish("orders", "1", r#"{"n":2}"#)
        .await
        .expect("publish second");

    // Same key, same partition, increasing offsets
    assert_eq!(first.partition, second.partition);
    assert!(second.offset > first.offset);

    let received = poll_until(&mut consumer, 2).await;
    assert_eq!(received[0].key.as_deref(), Some("1"));
    assert_eq!(received[0].payload.as_deref(), Some(br#"{"n":1}"#.as_slice()));
    assert_eq!(received[1].payload.as_deref(), Some(br#"{"n":2}"#.as_slice()));
    assert_eq!(received[1].offset, second.offset);

    consumer
        .close(CommitOffsets::new(), Duration::from_secs(10))
        .await
        .expect("close");
    bus.close(Duration::from_secs(5)).await.expect("flush");
}

#[tokio::test]
#[ignore]
async fn test_committed_offsets_survive_reconnect() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers, "resume");
    ensure_topic_exists(&bus, "resume-orders").await;

    bus.publish("resume-orders", "a", "first")
        .await
        .expect("publish");

    let mut consumer = bus.subscribe(&["resume-orders"]).await.expect("subscribe");
    let received = poll_until(&mut consumer, 1).await;

    let mut offsets = CommitOffsets::new();
    for record in &received {
        offsets.record(record);
    }
    consumer
        .close(offsets, Duration::from_secs(10))
        .await
        .expect("final commit");

    bus.publish("resume-orders", "a", "second")
        .await
        .expect("publish");

    let mut resumed = bus.subscribe(&["resume-orders"]).await.expect("subscribe");
    let received = poll_until(&mut resumed, 1).await;
    assert_eq!(received[0].payload.as_deref(), Some(b"second".as_slice()));

    resumed
        .close(CommitOffsets::new(), Duration::from_secs(10))
        .await
        .expect("close");
}

#[tokio::test]
#[ignore]
async fn test_orders_materialize_through_broker() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = Arc::new(bus(&brokers, "order-query"));
    ensure_topic_exists(&bus, "orders").await;

    let producer = CommandProducer::new(bus.clone(), "orders", Arc::new(SystemClock));
    let (order, _) = producer
        .create_order(&CreateOrderRequest {
            product_id: "P1".to_string(),
            quantity: 2,
            expected_delivery_date: "2025-01-01".to_string(),
        })
        .await
        .expect("create order");
    producer
        .cancel_order(order.id.clone(), "changed mind")
        .await
        .expect("cancel order");

    let store = Arc::new(InMemoryOrderViewStore::new());
    let (consumer, shutdown) = QueryConsumer::new(
        OrderProjection::new(Arc::clone(&store)),
        bus.clone(),
        QueryConsumerConfig::new("orders", "errors"),
        Arc::new(SystemClock),
    );
    let task = tokio::spawn(consumer.run());

    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let view = store.get(&order.id).await.expect("get");
            if view.is_some_and(|v| v.status == OrderStatus::Cancelled) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await
    .expect("order never materialized");

    shutdown.send(true).expect("consumer running");
    let report = task.await.expect("join").expect("consumer run");
    assert!(report.final_commit_ok);
}
