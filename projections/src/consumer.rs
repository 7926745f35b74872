//! `QueryConsumer`: the poll loop of the query side.
//!
//! # Overview
//!
//! One consumer owns one subscription and runs on its own task:
//!
//! ```text
//! loop {
//!     poll (bounded by poll timeout, raced against shutdown)
//!     for each record in the batch:
//!         decode envelope ─ poison ──► errors topic
//!         apply (retried) ─ orphan / store down ──► errors topic
//!     commit the batch
//! }
//! final commit + close (bounded by close timeout)
//! ```
//!
//! # Commit Discipline
//!
//! Offsets for a batch are committed only once every record in it has been
//! either applied or written to the errors topic. If a commit fails, the
//! offsets stay pending and ride along with the next commit (or the final
//! one). A crash between apply and commit means redelivery, which the fold
//! absorbs.
//!
//! # Poison Records
//!
//! A record that cannot be applied never stops the stream: it is wrapped in a
//! [`DeadLetter`] and published to the errors topic, keyed by its own key.
//! The one exception is the errors topic itself being unreachable after
//! retries. Then the consumer stops without committing the batch, so nothing
//! is lost; the batch is redelivered on restart.
//!
//! # Shutdown
//!
//! Send `true` on the sender returned by [`QueryConsumer::new`] (or drop it).
//! An in-flight poll is abandoned immediately, the consumer makes a final
//! commit of processed offsets and releases the connection within the close
//! timeout.

use order_pipeline_core::config::timeouts::{CONSUMER_CLOSE_TIMEOUT, CONSUMER_POLL_TIMEOUT};
use order_pipeline_core::environment::Clock;
use order_pipeline_core::event::{
    DeadLetter, EnvelopeError, EventEnvelope, PROCESSING_FAILED, SCHEMA_VERSION,
};
use order_pipeline_core::event_bus::{CommitOffsets, EventBus, LogConsumer, LogRecord};
use order_pipeline_core::projection::{ApplyOutcome, OrderViewStore, ProjectionError, Result};
use order_pipeline_runtime::retry::{retry_with_backoff, retry_with_predicate, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::projection::OrderProjection;

/// Key used on the errors topic for records that had none.
pub const UNKEYED: &str = "unkeyed";

/// Settings for a [`QueryConsumer`].
#[derive(Debug, Clone)]
pub struct QueryConsumerConfig {
    /// Topic holding order events
    pub orders_topic: String,
    /// Topic receiving records that could not be applied
    pub errors_topic: String,
    /// Upper bound on one poll
    pub poll_timeout: Duration,
    /// Upper bound on the final commit and release
    pub close_timeout: Duration,
    /// Retries for store failures while applying
    pub apply_retry: RetryPolicy,
    /// Retries for publishing to the errors topic
    pub dead_letter_retry: RetryPolicy,
}

impl QueryConsumerConfig {
    /// Default timeouts and retry policies for the given topics.
    #[must_use]
    pub fn new(orders_topic: impl Into<String>, errors_topic: impl Into<String>) -> Self {
        Self {
            orders_topic: orders_topic.into(),
            errors_topic: errors_topic.into(),
            poll_timeout: CONSUMER_POLL_TIMEOUT,
            close_timeout: CONSUMER_CLOSE_TIMEOUT,
            apply_retry: RetryPolicy::default(),
            dead_letter_retry: RetryPolicy::default(),
        }
    }

    /// Override the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Override the close timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Override both retry policies.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.apply_retry = policy.clone();
        self.dead_letter_retry = policy;
        self
    }
}

/// What a consumer did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Batches fully processed
    pub batches: u64,
    /// Records that changed the read model
    pub applied: u64,
    /// Records applied without effect
    pub skipped: u64,
    /// Records routed to the errors topic
    pub dead_lettered: u64,
    /// Whether the final commit succeeded
    pub final_commit_ok: bool,
}

/// Why a record was not applied.
#[derive(Debug)]
struct Rejection {
    kind: &'static str,
    reason: String,
}

impl Rejection {
    fn envelope(error: &EnvelopeError) -> Self {
        let kind = match error {
            EnvelopeError::Malformed(_) | EnvelopeError::Encoding(_) => "malformed",
            EnvelopeError::UnsupportedVersion(_) => "unsupported_version",
            EnvelopeError::UnknownType(_) => "unknown_type",
        };
        Self {
            kind,
            reason: error.to_string(),
        }
    }

    fn projection(error: &ProjectionError) -> Self {
        let kind = match error {
            ProjectionError::Orphan { .. } => "orphan",
            ProjectionError::Storage(_) => "storage",
            _ => "apply",
        };
        Self {
            kind,
            reason: error.to_string(),
        }
    }
}

/// Consumes the orders topic into an [`OrderViewStore`].
pub struct QueryConsumer<S> {
    projection: OrderProjection<S>,
    bus: Arc<dyn EventBus>,
    config: QueryConsumerConfig,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
    report: ConsumerReport,
}

impl<S: OrderViewStore> QueryConsumer<S> {
    /// Create a consumer and its shutdown sender.
    ///
    /// `bus` is used both to subscribe and to publish dead letters.
    #[must_use]
    pub fn new(
        projection: OrderProjection<S>,
        bus: Arc<dyn EventBus>,
        config: QueryConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = Self {
            projection,
            bus,
            config,
            clock,
            shutdown: shutdown_rx,
            report: ConsumerReport::default(),
        };
        (consumer, shutdown_tx)
    }

    /// Subscribe to the orders topic and run until shutdown.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Subscription`] if the subscription fails
    /// - [`ProjectionError::DeadLetter`] if a poison record could not be
    ///   written to the errors topic; the batch is left uncommitted
    pub async fn run(self) -> Result<ConsumerReport> {
        let consumer = self
            .bus
            .subscribe(&[self.config.orders_topic.as_str()])
            .await
            .map_err(|e| ProjectionError::Subscription(e.to_string()))?;
        self.run_with(consumer).await
    }

    /// Run the poll loop on an already-subscribed consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::DeadLetter`] if a poison record could not
    /// be written to the errors topic.
    #[allow(clippy::cognitive_complexity)]
    pub async fn run_with(mut self, mut consumer: Box<dyn LogConsumer>) -> Result<ConsumerReport> {
        tracing::info!(
            topic = %self.config.orders_topic,
            errors_topic = %self.config.errors_topic,
            "Starting query consumer"
        );

        let mut pending = CommitOffsets::new();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    continue;
                }

                result = consumer.poll(self.config.poll_timeout) => result,
            };

            let records = match polled {
                Ok(records) => records,
                Err(e) => {
                    // The client reconnects on its own; keep polling
                    metrics::counter!("consumer_poll_errors_total").increment(1);
                    tracing::warn!(error = %e, "Poll failed");
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }

            let processed = match self.process_batch(&records).await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        batch_size = records.len(),
                        "Stopping consumer; batch left uncommitted for redelivery"
                    );
                    // Earlier batches whose commit failed still get their final commit
                    self.report.final_commit_ok = self.close(consumer, pending).await;
                    self.log_stopped();
                    return Err(e);
                }
            };
            self.report.batches += 1;
            pending.merge(&processed);

            match consumer.commit(pending.clone()).await {
                Ok(()) => {
                    metrics::counter!("consumer_batches_committed_total").increment(1);
                    tracing::debug!(batch_size = records.len(), "Batch committed");
                    pending.clear();
                }
                Err(e) => {
                    metrics::counter!("consumer_commit_errors_total").increment(1);
                    tracing::warn!(error = %e, "Commit failed; offsets kept for the next commit");
                }
            }
        }

        self.report.final_commit_ok = self.close(consumer, pending).await;
        self.log_stopped();
        Ok(self.report)
    }

    fn log_stopped(&self) {
        tracing::info!(
            batches = self.report.batches,
            applied = self.report.applied,
            skipped = self.report.skipped,
            dead_lettered = self.report.dead_lettered,
            final_commit_ok = self.report.final_commit_ok,
            "Query consumer stopped"
        );
    }

    /// Final commit and release, bounded by the close timeout.
    async fn close(&self, consumer: Box<dyn LogConsumer>, pending: CommitOffsets) -> bool {
        let timeout = self.config.close_timeout;
        match tokio::time::timeout(timeout, consumer.close(pending, timeout)).await {
            Ok(Ok(())) => {
                tracing::info!("Consumer closed");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    error = %e,
                    "Final commit failed; uncommitted records will be redelivered"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Consumer close timed out; connection dropped"
                );
                false
            }
        }
    }

    /// Apply or dead-letter every record; returns the offsets to commit.
    async fn process_batch(&mut self, records: &[LogRecord]) -> Result<CommitOffsets> {
        let mut offsets = CommitOffsets::new();
        for record in records {
            match self.handle_record(record).await {
                Ok(ApplyOutcome::Unchanged(_)) => self.report.skipped += 1,
                Ok(ApplyOutcome::Created(_) | ApplyOutcome::Updated(_)) => self.report.applied += 1,
                Err(rejection) => {
                    self.dead_letter(record, &rejection).await?;
                    self.report.dead_lettered += 1;
                }
            }
            offsets.record(record);
        }
        Ok(offsets)
    }

    async fn handle_record(
        &self,
        record: &LogRecord,
    ) -> std::result::Result<ApplyOutcome, Rejection> {
        let Some(payload) = record.payload.as_deref() else {
            return Err(Rejection {
                kind: "malformed",
                reason: "record has no payload".to_string(),
            });
        };
        let envelope = EventEnvelope::decode(payload).map_err(|e| Rejection::envelope(&e))?;

        // Per-order ordering only holds if the record was keyed by its order
        if record.key.as_deref() != Some(envelope.partition_key()) {
            return Err(Rejection {
                kind: "key_mismatch",
                reason: format!(
                    "record key {:?} does not match orderID '{}'",
                    record.key,
                    envelope.partition_key()
                ),
            });
        }

        let position = record.position();
        let projection = &self.projection;
        let envelope = &envelope;
        retry_with_predicate(
            &self.config.apply_retry,
            "apply order event",
            move || projection.apply(position, envelope),
            |e| matches!(e, ProjectionError::Storage(_)),
        )
        .await
        .map_err(|e| Rejection::projection(&e))
    }

    async fn dead_letter(&self, record: &LogRecord, rejection: &Rejection) -> Result<()> {
        let letter = DeadLetter {
            timestamp_millis: self.clock.now_millis(),
            event_type: PROCESSING_FAILED.to_string(),
            version: SCHEMA_VERSION.to_string(),
            source_topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            reason: rejection.reason.clone(),
            payload: record
                .payload
                .as_deref()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        };
        let payload =
            serde_json::to_string(&letter).map_err(|e| ProjectionError::DeadLetter(e.to_string()))?;
        let key = record.key.as_deref().unwrap_or(UNKEYED);

        let bus = &self.bus;
        let topic = self.config.errors_topic.as_str();
        let body = payload.as_str();
        retry_with_backoff(&self.config.dead_letter_retry, "publish dead letter", move || {
            bus.publish(topic, key, body)
        })
        .await
        .map_err(|e| ProjectionError::DeadLetter(e.to_string()))?;

        metrics::counter!("order_events_dead_lettered_total", "kind" => rejection.kind)
            .increment(1);
        tracing::warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            key,
            kind = rejection.kind,
            reason = %rejection.reason,
            "Record routed to errors topic"
        );
        Ok(())
    }
}
