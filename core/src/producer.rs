//! Command side: turn requests into events on the orders topic.
//!
//! [`CommandProducer`] validates a request, assigns the order id, wraps the
//! event in a versioned envelope and publishes it keyed by the order id. It
//! returns only after the broker has acknowledged the write, so a caller that
//! sees `Ok` knows the event is durable at the configured acknowledgment
//! level.

use crate::environment::Clock;
use crate::event::{EnvelopeError, EventEnvelope, OrderEvent};
use crate::event_bus::{EventBus, EventBusError, RecordMetadata};
use crate::order::{CreateOrderRequest, Order, OrderId, OrderIdGenerator, ValidationError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors returned by [`CommandProducer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// The request was rejected before anything was published
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// The broker did not acknowledge in time; the event may or may not exist
    #[error("Publish timed out on topic '{topic}'")]
    PublishTimeout {
        /// Topic that timed out
        topic: String,
    },

    /// The broker could not accept the event
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The envelope could not be serialized
    #[error(transparent)]
    Encoding(#[from] EnvelopeError),
}

impl From<EventBusError> for ProducerError {
    fn from(error: EventBusError) -> Self {
        match error {
            EventBusError::PublishTimeout { topic } => Self::PublishTimeout { topic },
            other => Self::BrokerUnavailable(other.to_string()),
        }
    }
}

impl ProducerError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::PublishTimeout { .. } => "timeout",
            Self::BrokerUnavailable(_) => "unavailable",
            Self::Encoding(_) => "encoding",
        }
    }
}

/// Publishes order events onto the orders topic.
///
/// Holds one shared producer connection; safe to call from any number of
/// request handlers concurrently.
pub struct CommandProducer {
    bus: Arc<dyn EventBus>,
    topic: String,
    clock: Arc<dyn Clock>,
    ids: OrderIdGenerator,
}

impl CommandProducer {
    /// Create a producer writing to `topic`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            clock,
            ids: OrderIdGenerator::new(),
        }
    }

    /// Topic events are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Validate a creation request and publish `OrderCreated`.
    ///
    /// # Errors
    ///
    /// - [`ProducerError::Validation`] if the request is malformed; nothing is
    ///   published
    /// - [`ProducerError::PublishTimeout`] or [`ProducerError::BrokerUnavailable`]
    ///   if the broker did not acknowledge
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<(Order, RecordMetadata), ProducerError> {
        if let Err(e) = request.validate() {
            self.record_failure(crate::event::ORDER_CREATED, &ProducerError::Validation(e.clone()));
            return Err(e.into());
        }

        let now = self.clock.now_millis();
        let id = self.ids.next_id(now);
        let order = Order::created(id.clone(), request);
        let envelope = EventEnvelope::new(
            now,
            OrderEvent::OrderCreated {
                order_id: id,
                product_id: order.product_id.clone(),
                quantity: order.quantity,
                expected_delivery_date: order.expected_delivery_date.clone(),
            },
        );

        let metadata = self.publish(&envelope).await?;
        Ok((order, metadata))
    }

    /// Publish `OrderCancelled` for an existing order.
    ///
    /// The command side keeps no state, so the id is not checked here; a
    /// cancellation for an unknown order is dead-lettered by the query side.
    ///
    /// # Errors
    ///
    /// - [`ProducerError::Validation`] if `reason` is blank
    /// - [`ProducerError::PublishTimeout`] or [`ProducerError::BrokerUnavailable`]
    ///   if the broker did not acknowledge
    pub async fn cancel_order(
        &self,
        id: OrderId,
        reason: &str,
    ) -> Result<RecordMetadata, ProducerError> {
        if reason.trim().is_empty() {
            let error = ProducerError::Validation(ValidationError::MissingReason);
            self.record_failure(crate::event::ORDER_CANCELLED, &error);
            return Err(error);
        }

        let envelope = EventEnvelope::new(
            self.clock.now_millis(),
            OrderEvent::OrderCancelled {
                order_id: id,
                reason: reason.to_string(),
            },
        );
        self.publish(&envelope).await
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<RecordMetadata, ProducerError> {
        let event_type = envelope.event_type();
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                let error = ProducerError::from(e);
                self.record_failure(event_type, &error);
                return Err(error);
            }
        };

        let start = Instant::now();
        let result = self
            .bus
            .publish(&self.topic, envelope.partition_key(), &payload)
            .await;
        metrics::histogram!("order_publish_duration_seconds", "type" => event_type)
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(metadata) => {
                metrics::counter!("order_events_published_total", "type" => event_type)
                    .increment(1);
                tracing::info!(
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    key = envelope.partition_key(),
                    event_type,
                    "Event published"
                );
                Ok(metadata)
            }
            Err(e) => {
                let error = ProducerError::from(e);
                self.record_failure(event_type, &error);
                Err(error)
            }
        }
    }

    fn record_failure(&self, event_type: &'static str, error: &ProducerError) {
        metrics::counter!(
            "order_publish_errors_total",
            "type" => event_type,
            "kind" => error.kind()
        )
        .increment(1);
        match error {
            ProducerError::Validation(e) => {
                tracing::debug!(event_type, error = %e, "Rejected invalid command");
            }
            other => {
                tracing::error!(
                    event_type,
                    topic = %self.topic,
                    error = %other,
                    "Failed to publish event"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event_bus::LogConsumer;
    use chrono::{DateTime, TimeZone, Utc};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FrozenClock(i64);

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(self.0)
                .single()
                .expect("valid timestamp")
        }
    }

    /// Records every publish; optionally fails them all.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String, String)>>,
        fail_with: Option<EventBusError>,
    }

    impl EventBus for RecordingBus {
        fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &str,
        ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, EventBusError>> + Send + '_>>
        {
            let topic = topic.to_string();
            let key = key.to_string();
            let payload = payload.to_string();
            Box::pin(async move {
                if let Some(error) = &self.fail_with {
                    return Err(error.clone());
                }
                let mut published = self.published.lock().expect("lock");
                published.push((topic.clone(), key, payload));
                Ok(RecordMetadata {
                    topic,
                    partition: 0,
                    offset: i64::try_from(published.len() - 1).expect("offset"),
                })
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, EventBusError>> + Send + '_>>
        {
            let topics = topics.iter().map(ToString::to_string).collect();
            Box::pin(async move {
                Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "publish-only".to_string(),
                })
            })
        }

        fn close(
            &self,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn producer(bus: Arc<RecordingBus>) -> CommandProducer {
        CommandProducer::new(bus, "orders", Arc::new(FrozenClock(1_735_689_600_000)))
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            product_id: "P1".to_string(),
            quantity: 2,
            expected_delivery_date: "2025-01-01".to_string(),
        }
    }

    #[tokio::test]
    async fn create_publishes_keyed_envelope() {
        let bus = Arc::new(RecordingBus::default());
        let (order, metadata) = producer(Arc::clone(&bus))
            .create_order(&request())
            .await
            .expect("create");

        assert_eq!(order.id.as_str(), "1735689600000");
        assert_eq!(metadata.topic, "orders");

        let published = bus.published.lock().expect("lock");
        let (topic, key, payload) = &published[0];
        assert_eq!(topic, "orders");
        assert_eq!(key, "1735689600000");

        let envelope = EventEnvelope::decode(payload.as_bytes()).expect("decode");
        assert_eq!(envelope.timestamp_millis, 1_735_689_600_000);
        assert_eq!(envelope.partition_key(), key);
    }

    #[tokio::test]
    async fn invalid_request_publishes_nothing() {
        let bus = Arc::new(RecordingBus::default());
        let result = producer(Arc::clone(&bus))
            .create_order(&CreateOrderRequest {
                quantity: -1,
                ..request()
            })
            .await;

        assert_eq!(
            result,
            Err(ProducerError::Validation(ValidationError::InvalidQuantity(-1)))
        );
        assert!(bus.published.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn publish_timeout_is_surfaced() {
        let bus = Arc::new(RecordingBus {
            fail_with: Some(EventBusError::PublishTimeout {
                topic: "orders".to_string(),
            }),
            ..RecordingBus::default()
        });
        let result = producer(bus).create_order(&request()).await;
        assert!(matches!(result, Err(ProducerError::PublishTimeout { .. })));
    }

    #[tokio::test]
    async fn broker_failure_is_unavailable() {
        let bus = Arc::new(RecordingBus {
            fail_with: Some(EventBusError::BrokerUnavailable {
                topic: "orders".to_string(),
                reason: "all brokers down".to_string(),
            }),
            ..RecordingBus::default()
        });
        let result = producer(bus).create_order(&request()).await;
        assert!(matches!(result, Err(ProducerError::BrokerUnavailable(_))));
    }

    #[tokio::test]
    async fn same_millisecond_creates_get_distinct_ids() {
        let bus = Arc::new(RecordingBus::default());
        let producer = producer(Arc::clone(&bus));
        let (a, _) = producer.create_order(&request()).await.expect("first");
        let (b, _) = producer.create_order(&request()).await.expect("second");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn cancel_requires_reason() {
        let bus = Arc::new(RecordingBus::default());
        let result = producer(Arc::clone(&bus))
            .cancel_order(OrderId::from("7"), " ")
            .await;
        assert_eq!(
            result,
            Err(ProducerError::Validation(ValidationError::MissingReason))
        );
        assert!(bus.published.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn cancel_is_keyed_by_order_id() {
        let bus = Arc::new(RecordingBus::default());
        producer(Arc::clone(&bus))
            .cancel_order(OrderId::from("7"), "out of stock")
            .await
            .expect("cancel");

        let published = bus.published.lock().expect("lock");
        assert_eq!(published[0].1, "7");
        assert!(published[0].2.contains("OrderCancelled"));
    }
}
