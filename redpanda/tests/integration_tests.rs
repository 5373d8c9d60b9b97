//! Integration tests for [`RedpandaBroker`] against a real Kafka instance.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p courier-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use courier_core::broker::{Binding, MessageBroker};
use courier_redpanda::RedpandaBroker;
use courier_runtime::{
    BridgeConfig, CorrelationRegistry, OperationRouter, ReplyListener, RequestConsumer, ServiceMessageClient,
    ServiceResponse, handler_fn,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const EXCHANGE: &str = "service.exchange";

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
    let brokers = format!("{host}:{port}");
    wait_for_kafka_ready(&brokers).await;
    (kafka, brokers)
}

async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(broker) = RedpandaBroker::builder().brokers(brokers).build() {
            if broker.publish(EXCHANGE, "warmup", "warmup", b"{}").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

/// Publish a warmup record so the topic exists before consumers join.
async fn ensure_topic_exists(broker: &RedpandaBroker, routing_key: &str) {
    for attempt in 1..=30 {
        if broker.publish(EXCHANGE, routing_key, "warmup", b"warmup").await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != 30, "Failed to create topic for {routing_key}");
    }
}

fn broker(brokers: &str) -> RedpandaBroker {
    RedpandaBroker::builder()
        .brokers(brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create broker")
}

#[tokio::test]
#[ignore]
async fn test_publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers);
    ensure_topic_exists(&broker, "account.consumer.routing.key").await;

    let binding = Binding::new(EXCHANGE, "account.consumer.routing.key", "account.service.consumer");
    let mut deliveries = broker.subscribe(&binding).await.expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    broker
        .publish(EXCHANGE, "account.consumer.routing.key", "corr-1", br#"{"n":1}"#)
        .await
        .expect("Failed to publish");

    let delivery = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let delivery = deliveries
                .next()
                .await
                .expect("stream ended")
                .expect("Failed to receive");
            if delivery.key.as_deref() != Some("warmup") {
                return delivery;
            }
        }
    })
    .await
    .expect("Timeout waiting for delivery");

    assert_eq!(delivery.key.as_deref(), Some("corr-1"));
    assert_eq!(delivery.routing_key, "account.consumer.routing.key");
    assert_eq!(delivery.body, br#"{"n":1}"#);
}

#[tokio::test]
#[ignore]
async fn test_distinct_queues_each_receive_every_message() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers);
    ensure_topic_exists(&broker, "audit.listener.routing.key").await;

    let mut first = broker
        .subscribe(&Binding::new(EXCHANGE, "audit.listener.routing.key", "audit.a"))
        .await
        .expect("Failed to subscribe a");
    let mut second = broker
        .subscribe(&Binding::new(EXCHANGE, "audit.listener.routing.key", "audit.b"))
        .await
        .expect("Failed to subscribe b");
    tokio::time::sleep(Duration::from_secs(3)).await;

    broker
        .publish(EXCHANGE, "audit.listener.routing.key", "corr-2", b"payload")
        .await
        .expect("Failed to publish");

    for stream in [&mut first, &mut second] {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let delivery = stream.next().await.expect("stream ended").expect("Failed to receive");
                if delivery.key.as_deref() == Some("corr-2") {
                    return;
                }
            }
        })
        .await
        .expect("Timeout waiting for delivery");
    }
}

#[tokio::test]
#[ignore]
async fn test_bridge_round_trip_over_kafka() {
    let (_kafka, brokers) = start_kafka().await;
    let broker: Arc<dyn MessageBroker> = Arc::new(broker(&brokers));
    let warmup = RedpandaBroker::builder().brokers(&brokers).build().expect("broker");
    ensure_topic_exists(&warmup, "account.consumer.routing.key").await;
    ensure_topic_exists(&warmup, "gateway.listener.routing.key").await;

    let router = OperationRouter::new().route(
        "getAccountById",
        handler_fn(|request| async move { Ok(json!({ "id": request.payload().cloned() })) }),
    );
    let _consumer = RequestConsumer::new(Arc::clone(&broker), router, BridgeConfig::new("account"))
        .spawn()
        .await
        .expect("consumer");

    let config = BridgeConfig::new("gateway").with_reply_timeout(Duration::from_secs(20));
    let registry = Arc::new(CorrelationRegistry::new());
    let _listener = ReplyListener::new(Arc::clone(&broker), Arc::clone(&registry), config.clone())
        .spawn()
        .await
        .expect("listener");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let client = ServiceMessageClient::new(broker, registry, config);
    let response: ServiceResponse<serde_json::Value> = client
        .send_message("account", "getAccountById", &42)
        .await
        .expect("round trip");

    assert_eq!(response, ServiceResponse::Content(json!({ "id": 42 })));
}
