//! Redpanda event bus for the order pipeline.
//!
//! This crate implements the [`EventBus`] and [`LogConsumer`] traits from
//! `order-pipeline-core` on top of rdkafka, so it works against any
//! Kafka-compatible broker: Redpanda, Apache Kafka, managed Event Streams.
//!
//! # Architecture
//!
//! ```text
//! POST /orders ──► CommandProducer ──► RedpandaEventBus::publish ──► orders topic
//!                                                                        │
//! GET /orders ◄── OrderViewStore ◄── QueryConsumer ◄── RedpandaConsumer ◄┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once** with explicit offset commits:
//! - The producer waits for the partition leader to acknowledge (`acks=1`)
//! - The consumer never commits on its own; the poll loop commits after a
//!   batch has been fully applied
//! - Records after the last commit are redelivered after a restart, so the
//!   read side must be idempotent
//! - Ordering is guaranteed within a partition, and records are keyed by
//!   order id
//!
//! # Example
//!
//! ```no_run
//! use order_pipeline_core::config::BrokerConfig;
//! use order_pipeline_core::event_bus::EventBus;
//! use order_pipeline_redpanda::RedpandaEventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BrokerConfig::from_env()?;
//! let bus = RedpandaEventBus::builder()
//!     .broker_config(&config)
//!     .client_id("order-command")
//!     .build()?;
//!
//! let metadata = bus.publish("orders", "1735689600001", "{}").await?;
//! println!("stored at {}:{}", metadata.partition, metadata.offset);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::FutureExt;
use order_pipeline_core::config::{BrokerConfig, ConnectionParams, ConsumerSettings};
use order_pipeline_core::event_bus::{
    CommitOffsets, EventBus, EventBusError, LogConsumer, LogRecord, RecordMetadata,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

/// Default upper bound on records returned by one poll.
pub const DEFAULT_MAX_BATCH: usize = 100;

/// Build an rdkafka client configuration from connection parameters.
#[must_use]
pub fn client_config(params: &ConnectionParams) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in params.iter() {
        config.set(key, value);
    }
    config
}

/// Map a failed delivery to the bus error taxonomy.
///
/// Timeouts (local queue expiry, request timeout, full queue) become
/// [`EventBusError::PublishTimeout`]; everything else means the broker
/// could not take the write.
#[must_use]
pub fn classify_publish_error(topic: &str, error: &KafkaError) -> EventBusError {
    match error {
        KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::QueueFull,
        ) => EventBusError::PublishTimeout {
            topic: topic.to_string(),
        },
        other => EventBusError::BrokerUnavailable {
            topic: topic.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Redpanda event bus.
///
/// Owns one producer connection, shared by every publisher in the process.
/// Consumers are created on [`EventBus::subscribe`] from the configured
/// [`ConsumerSettings`].
///
/// # Example
///
/// ```no_run
/// use order_pipeline_core::config::{BrokerConfig, ConsumerSettings, OffsetReset};
/// use order_pipeline_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .broker_config(&BrokerConfig::new("localhost:9092"))
///     .client_id("order-query")
///     .consumer(ConsumerSettings {
///         group_id: "order-query".to_string(),
///         client_id: "order-query-1".to_string(),
///         auto_commit: false,
///         offset_reset: OffsetReset::Earliest,
///     })
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    broker: BrokerConfig,
    consumer: Option<ConsumerSettings>,
    publish_timeout: Duration,
    max_batch: usize,
}

impl std::fmt::Debug for RedpandaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaEventBus")
            .field("bootstrap_servers", &self.broker.bootstrap_servers)
            .field("consumer", &self.consumer)
            .field("publish_timeout", &self.publish_timeout)
            .field("max_batch", &self.max_batch)
            .finish_non_exhaustive()
    }
}

impl RedpandaEventBus {
    /// Plaintext bus for the given bootstrap servers, publish-only.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder()
            .broker_config(&BrokerConfig::new(brokers))
            .build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers this bus connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.broker.bootstrap_servers
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Debug, Default)]
pub struct RedpandaEventBusBuilder {
    broker: Option<BrokerConfig>,
    client_id: Option<String>,
    consumer: Option<ConsumerSettings>,
    publish_timeout: Option<Duration>,
    max_batch: Option<usize>,
}

impl RedpandaEventBusBuilder {
    /// Broker connection configuration (required).
    #[must_use]
    pub fn broker_config(mut self, config: &BrokerConfig) -> Self {
        self.broker = Some(config.clone());
        self
    }

    /// Producer client id.
    ///
    /// Default: `"order-pipeline"`
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Group membership and commit mode for consumers opened by
    /// [`EventBus::subscribe`]. Without it the bus is publish-only.
    #[must_use]
    pub fn consumer(mut self, settings: ConsumerSettings) -> Self {
        self.consumer = Some(settings);
        self
    }

    /// How long a publish waits for acknowledgment.
    ///
    /// Default: the broker configuration's producer timeout
    #[must_use]
    pub const fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = Some(timeout);
        self
    }

    /// Upper bound on records returned by one poll.
    ///
    /// Default: [`DEFAULT_MAX_BATCH`]
    #[must_use]
    pub const fn max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = Some(max_batch);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// Creating the producer does not contact the broker; connection
    /// failures surface on the first publish.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if:
    /// - No broker configuration was given
    /// - The producer rejects the configuration
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let broker = self.broker.ok_or_else(|| {
            EventBusError::ConnectionFailed("Broker configuration not set".to_string())
        })?;
        let client_id = self
            .client_id
            .unwrap_or_else(|| "order-pipeline".to_string());

        let params = broker.producer_params(&client_id);
        let producer: FutureProducer = client_config(&params).create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        let publish_timeout = self.publish_timeout.unwrap_or(broker.producer_timeout);
        let max_batch = self.max_batch.unwrap_or(DEFAULT_MAX_BATCH).max(1);

        tracing::info!(
            brokers = %broker.bootstrap_servers,
            client_id = %client_id,
            security_protocol = broker.security_protocol().as_str(),
            consumer_group = self.consumer.as_ref().map(|c| c.group_id.as_str()),
            publish_timeout_ms = u64::try_from(publish_timeout.as_millis()).unwrap_or(u64::MAX),
            max_batch,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            broker,
            consumer: self.consumer,
            publish_timeout,
            max_batch,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_string();
        let timeout = self.publish_timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        "Record acknowledged"
                    );
                    Ok(RecordMetadata {
                        topic,
                        partition,
                        offset,
                    })
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish record"
                    );
                    Err(classify_publish_error(&topic, &kafka_error))
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, EventBusError>> + Send + '_>>
    {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let settings = self.consumer.as_ref().ok_or_else(|| {
                EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: "No consumer settings configured".to_string(),
                }
            })?;

            let params = self.broker.consumer_params(settings);
            let consumer: StreamConsumer = client_config(&params).create().map_err(|e| {
                EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                }
            })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %settings.group_id,
                client_id = %settings.client_id,
                auto_commit = settings.auto_commit,
                offset_reset = settings.offset_reset.as_str(),
                "Subscribed to topics"
            );

            Ok(Box::new(RedpandaConsumer {
                consumer,
                max_batch: self.max_batch,
            }) as Box<dyn LogConsumer>)
        })
    }

    fn close(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let producer = self.producer.clone();

        Box::pin(async move {
            let flushed =
                tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                    .await
                    .map_err(|e| EventBusError::Closed(format!("Flush task failed: {e}")))?;

            match flushed {
                Ok(()) => {
                    tracing::info!("Producer flushed");
                    Ok(())
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Producer flush did not complete");
                    Err(EventBusError::Closed(format!("Flush failed: {e}")))
                },
            }
        })
    }
}

/// One subscribed consumer, owned by a single poll loop.
struct RedpandaConsumer {
    consumer: StreamConsumer,
    max_batch: usize,
}

impl RedpandaConsumer {
    fn to_record<M: Message>(message: &M) -> LogRecord {
        LogRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec),
        }
    }
}

fn partition_list(offsets: &CommitOffsets) -> Result<TopicPartitionList, EventBusError> {
    let mut list = TopicPartitionList::new();
    for (topic, partition, next) in offsets.iter() {
        list.add_partition_offset(topic, partition, Offset::Offset(next))
            .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;
    }
    Ok(list)
}

impl LogConsumer for RedpandaConsumer {
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventBusError>> + Send + '_>> {
        Box::pin(async move {
            let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_elapsed) => return Ok(Vec::new()),
                Ok(Err(e)) => return Err(EventBusError::PollFailed(e.to_string())),
                Ok(Ok(message)) => Self::to_record(&message),
            };

            let mut batch = vec![first];
            while batch.len() < self.max_batch {
                match self.consumer.recv().now_or_never() {
                    Some(Ok(message)) => batch.push(Self::to_record(&message)),
                    Some(Err(e)) => {
                        // Keep what we have; the error resurfaces on the next poll
                        tracing::debug!(error = %e, "Stopped draining batch");
                        break;
                    },
                    None => break,
                }
            }

            tracing::trace!(records = batch.len(), "Polled batch");
            Ok(batch)
        })
    }

    fn commit(
        &mut self,
        offsets: CommitOffsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move {
            if offsets.is_empty() {
                return Ok(());
            }
            let list = partition_list(&offsets)?;
            self.consumer
                .commit(&list, CommitMode::Async)
                .map_err(|e| EventBusError::CommitFailed(e.to_string()))
        })
    }

    fn close(
        self: Box<Self>,
        pending: CommitOffsets,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send>> {
        Box::pin(async move {
            let Self { consumer, .. } = *self;
            let closed = run_detached("order-consumer-close", timeout, move || {
                let committed = if pending.is_empty() {
                    Ok(())
                } else {
                    partition_list(&pending).and_then(|list| {
                        consumer
                            .commit(&list, CommitMode::Sync)
                            .map_err(|e| EventBusError::CommitFailed(e.to_string()))
                    })
                };
                consumer.unsubscribe();
                // Dropping the consumer leaves the group; this can block too
                drop(consumer);
                committed
            })
            .await;

            match closed {
                Ok(result) => {
                    tracing::info!(committed = result.is_ok(), "Consumer closed");
                    result
                },
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Consumer close abandoned; uncommitted records will be redelivered"
                    );
                    Err(e)
                },
            }
        })
    }
}

/// Run blocking client work on a detached thread, waiting at most `timeout`.
///
/// The thread is never joined, so the runtime can shut down while a broker
/// that stopped answering still holds it.
async fn run_detached<T, F>(name: &str, timeout: Duration, work: F) -> Result<T, EventBusError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            // The receiver is gone once the wait timed out
            let _ = tx.send(work());
        })
        .map_err(|e| EventBusError::Closed(format!("Failed to start {name} thread: {e}")))?;

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(EventBusError::Closed(format!(
            "{name} thread exited without a result"
        ))),
        Err(_elapsed) => Err(EventBusError::Closed("Close timed out".to_string())),
    }
}
