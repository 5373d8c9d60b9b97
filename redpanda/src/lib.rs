//! Redpanda message broker for Courier.
//!
//! Implements [`MessageBroker`] over rdkafka, so it works against Redpanda or
//! any Kafka-compatible cluster.
//!
//! # Mapping
//!
//! Kafka has no exchanges or routing keys, so bindings map onto topics and
//! consumer groups:
//!
//! | Broker concept          | Kafka                                   |
//! |-------------------------|-----------------------------------------|
//! | exchange + routing key  | topic `<exchange>.<routing_key>`        |
//! | queue                   | consumer group `<group_prefix><queue>`  |
//! | message key             | record key (the correlation id)         |
//!
//! Subscribers with the same queue join one consumer group and split the
//! partitions; different queues are different groups and each see every
//! record.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the delivery is handed to the subscriber's channel
//! - If the process crashes before commit, the record is redelivered
//! - The bridge tolerates duplicates: a second reply for an id finds no waiter
//!
//! # Example
//!
//! ```no_run
//! use courier_core::broker::{Binding, MessageBroker};
//! use courier_redpanda::RedpandaBroker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::new("localhost:9092")?;
//!
//! broker
//!     .publish("service.exchange", "account.consumer.routing.key", "corr-1", b"{}")
//!     .await?;
//!
//! let binding = Binding::new(
//!     "service.exchange",
//!     "account.consumer.routing.key",
//!     "account.service.consumer",
//! );
//! let mut deliveries = broker.subscribe(&binding).await?;
//! while let Some(delivery) = deliveries.next().await {
//!     println!("{:?}", delivery?.key);
//! }
//! # Ok(())
//! # }
//! ```

use courier_core::broker::{Binding, BrokerError, Delivery, DeliveryStream, MessageBroker, topic_name};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redpanda-backed [`MessageBroker`].
///
/// # Example
///
/// ```no_run
/// use courier_redpanda::RedpandaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .group_prefix("prod.")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    group_prefix: String,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Create a broker client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for `binding`.
    #[must_use]
    pub fn consumer_group(&self, binding: &Binding) -> String {
        format!("{}{}", self.group_prefix, binding.queue)
    }
}

// librdkafka reads 0 as no delivery timeout.
fn message_timeout_ms(timeout: Duration) -> String {
    timeout.as_millis().max(1).to_string()
}

/// Builder for [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    group_prefix: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Comma-separated bootstrap servers (e.g. `localhost:9092`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`. Default `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prefix prepended to queue names to form consumer group ids.
    ///
    /// Lets several environments share a cluster without their queues
    /// competing.
    #[must_use]
    pub fn group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = Some(prefix.into());
        self
    }

    /// Deliveries buffered between the Kafka consumer and the subscriber.
    /// Default 1000; zero is treated as one.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where new consumer groups start reading: `"earliest"` or `"latest"`
    /// (default).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", message_timeout_ms(timeout))
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1);
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            group_prefix: self.group_prefix.unwrap_or_default(),
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl MessageBroker for RedpandaBroker {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        key: &str,
        body: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic_name(exchange, routing_key);
        let key = key.to_string();
        let body = body.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&body).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = %key,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                    Err(BrokerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        binding: &Binding,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let topic = binding.topic();
        let routing_key = binding.routing_key.clone();
        let group = self.consumer_group(binding);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("allow.auto.create.topics", "true")
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %group,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let (tx, mut rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(next) = stream.next().await {
                    match next {
                        Ok(message) => {
                            let delivery = Delivery {
                                routing_key: routing_key.clone(),
                                key: message
                                    .key()
                                    .map(|key| String::from_utf8_lossy(key).into_owned()),
                                body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                            };

                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received message"
                            );

                            // Commit only after the hand-off; exit without
                            // committing if the subscriber is gone.
                            if tx.send(Ok(delivery)).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err = BrokerError::TransportError(format!("Failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!(consumer_group = %group, "Consumer task exiting");
            });

            let stream: DeliveryStream = Box::pin(async_stream::stream! {
                while let Some(delivery) = rx.recv().await {
                    yield delivery;
                }
            });
            Ok(stream)
        })
    }
}
