//! Broker seam: publishing keyed records and polling them back.
//!
//! This module provides the [`EventBus`] trait for publishing records to a
//! partitioned, ordered log and the [`LogConsumer`] trait for reading them
//! back in batches with explicit offset commits.
//!
//! # Key Principles
//!
//! - **Keyed publishing**: every record carries a key; the broker routes equal
//!   keys to the same partition, which gives per-key ordering
//! - **Acknowledged publishing**: [`EventBus::publish`] resolves only once the
//!   broker acknowledges the write (or fails)
//! - **Explicit commits**: consumers commit the offsets of records the
//!   application has finished with; delivery is at-least-once
//! - **Bounded waits**: polls, publishes and closes all take a timeout
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (testing crate) - in-process partitioned log
//! - `RedpandaEventBus` (redpanda crate) - Kafka-compatible brokers via rdkafka
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the traits can be used as
//! `Arc<dyn EventBus>` and `Box<dyn LogConsumer>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to create a client or connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not acknowledge a publish in time
    #[error("Publish to topic '{topic}' timed out")]
    PublishTimeout {
        /// The topic that failed
        topic: String,
    },

    /// The broker rejected or could not accept a publish
    #[error("Broker unavailable for topic '{topic}': {reason}")]
    BrokerUnavailable {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A poll failed (network partition, broker restart, ...)
    #[error("Poll failed: {0}")]
    PollFailed(String),

    /// Committing offsets failed
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// The connection was closed before the operation finished
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic written to
    pub topic: String,
    /// Partition the key was routed to
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

/// Position of a record in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

/// A record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Topic the record was read from
    pub topic: String,
    /// Partition the record was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Record key, if the record has one
    pub key: Option<String>,
    /// Raw payload, if the record has one
    pub payload: Option<Vec<u8>>,
}

impl LogRecord {
    /// Position of this record in the log.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        LogPosition {
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Offsets to commit, per topic partition.
///
/// Stores the NEXT offset to read (last processed offset + 1), which is what
/// Kafka-compatible brokers expect on commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOffsets(BTreeMap<(String, i32), i64>);

impl CommitOffsets {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Mark a record as processed.
    pub fn record(&mut self, record: &LogRecord) {
        self.advance(&record.topic, record.partition, record.offset + 1);
    }

    /// Move a partition's next offset forward; never moves it back.
    pub fn advance(&mut self, topic: &str, partition: i32, next_offset: i64) {
        let entry = self
            .0
            .entry((topic.to_string(), partition))
            .or_insert(next_offset);
        if next_offset > *entry {
            *entry = next_offset;
        }
    }

    /// Fold another set into this one.
    pub fn merge(&mut self, other: &Self) {
        for ((topic, partition), next) in &other.0 {
            self.advance(topic, *partition, *next);
        }
    }

    /// Next offset to read for a partition.
    #[must_use]
    pub fn next_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.0.get(&(topic.to_string(), partition)).copied()
    }

    /// Iterate `(topic, partition, next_offset)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, i64)> {
        self.0
            .iter()
            .map(|((topic, partition), next)| (topic.as_str(), *partition, *next))
    }

    /// Whether there is anything to commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Publish side of the broker seam.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: one producer connection per process
/// is shared by every request handler.
pub trait EventBus: Send + Sync {
    /// Publish a record keyed by `key`.
    ///
    /// Resolves once the broker acknowledges the write at the configured
    /// acknowledgment level.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::PublishTimeout`] if no acknowledgment arrives in time
    /// - [`EventBusError::BrokerUnavailable`] if the broker rejects the write
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, EventBusError>> + Send + '_>>;

    /// Open a consumer subscribed to `topics`.
    ///
    /// Group membership, offset reset and commit mode come from the bus
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the consumer cannot be
    /// created or subscribed.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, EventBusError>> + Send + '_>>;

    /// Flush in-flight publishes and release the producer connection.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Closed`] if the flush did not finish within
    /// `timeout`; unflushed records are lost.
    fn close(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}

/// Consume side of the broker seam.
///
/// One consumer is owned by exactly one poll loop; it is `Send` but never
/// shared.
pub trait LogConsumer: Send {
    /// Wait up to `timeout` for records.
    ///
    /// Returns an empty batch if nothing arrived in time. Records of the same
    /// partition are returned in offset order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PollFailed`] on transport failure. The caller
    /// may keep polling; the client reconnects on its own.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventBusError>> + Send + '_>>;

    /// Commit offsets for the consumer group.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the broker rejects the commit.
    fn commit(
        &mut self,
        offsets: CommitOffsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Make a final commit of `pending` and release the connection.
    ///
    /// Bounded by `timeout`: when it elapses the connection is dropped and
    /// the pending commit is lost (records will be redelivered).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Closed`] if the timeout elapsed, or
    /// [`EventBusError::CommitFailed`] if the final commit was rejected.
    fn close(
        self: Box<Self>,
        pending: CommitOffsets,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, partition: i32, offset: i64) -> LogRecord {
        LogRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: Some("k".to_string()),
            payload: None,
        }
    }

    #[test]
    fn commit_offsets_store_next_offset() {
        let mut offsets = CommitOffsets::new();
        offsets.record(&record("orders", 0, 4));
        assert_eq!(offsets.next_offset("orders", 0), Some(5));
    }

    #[test]
    fn commit_offsets_never_move_back() {
        let mut offsets = CommitOffsets::new();
        offsets.record(&record("orders", 1, 9));
        offsets.record(&record("orders", 1, 3));
        assert_eq!(offsets.next_offset("orders", 1), Some(10));
    }

    #[test]
    fn merge_keeps_highest_per_partition() {
        let mut a = CommitOffsets::new();
        a.record(&record("orders", 0, 1));
        a.record(&record("orders", 1, 7));

        let mut b = CommitOffsets::new();
        b.record(&record("orders", 0, 5));
        b.record(&record("orders", 1, 2));
        b.record(&record("errors", 0, 0));

        a.merge(&b);
        let merged: Vec<_> = a.iter().collect();
        assert_eq!(
            merged,
            vec![("errors", 0, 1), ("orders", 0, 6), ("orders", 1, 8)]
        );
    }

    #[test]
    fn record_position_orders_by_offset() {
        assert!(record("orders", 0, 1).position() < record("orders", 0, 2).position());
    }
}
