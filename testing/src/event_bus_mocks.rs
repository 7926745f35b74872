//! In-memory partitioned log.
//!
//! [`InMemoryEventBus`] behaves like a single-broker Kafka-compatible cluster
//! as far as the pipeline can observe:
//!
//! - each topic has a fixed number of partitions; a key always hashes to the
//!   same one
//! - every partition is an append-only vector, so the index is the offset
//! - consumers belong to a group; the group's committed offsets survive the
//!   consumer and are where the next consumer of that group resumes
//! - with no committed offset, the group's [`OffsetReset`] decides where to
//!   start
//!
//! Failures can be injected per topic (publish), for the next polls, and for
//! commits. Published records can be inspected.

use order_pipeline_core::config::{ConsumerSettings, OffsetReset};
use order_pipeline_core::event_bus::{
    CommitOffsets, EventBus, EventBusError, LogConsumer, LogRecord, RecordMetadata,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default partitions per topic.
pub const DEFAULT_PARTITIONS: i32 = 3;

/// Default maximum records returned by one poll.
pub const DEFAULT_MAX_BATCH: usize = 100;

/// One stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    /// Record key
    pub key: Option<String>,
    /// Record payload
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<PublishedRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    commit_history: Vec<(String, CommitOffsets)>,
    topic_failures: HashMap<String, EventBusError>,
    poll_failures: usize,
    fail_commits: bool,
    closed: bool,
}

impl LogState {
    fn partitions_mut(&mut self, topic: &str, count: i32) -> &mut Vec<Vec<PublishedRecord>> {
        self.topics.entry(topic.to_string()).or_insert_with(|| {
            (0..count.max(1)).map(|_| Vec::new()).collect()
        })
    }

    fn append(&mut self, topic: &str, partition: i32, record: PublishedRecord, count: i32) -> i64 {
        let partitions = self.partitions_mut(topic, count);
        let index = usize::try_from(partition).unwrap_or(0).min(partitions.len() - 1);
        let log = &mut partitions[index];
        log.push(record);
        i64::try_from(log.len() - 1).unwrap_or(i64::MAX)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<LogState>,
    appended: Notify,
    partitions: i32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory implementation of [`EventBus`].
///
/// Cloning shares the log, so a test can keep a handle while the producer
/// and consumer under test hold others.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
    consumer: ConsumerSettings,
    max_batch: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Create an empty log with [`DEFAULT_PARTITIONS`] per topic and a
    /// `test-group` consumer group reading from the earliest offset.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create an empty log with `partitions` per topic.
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LogState::default()),
                appended: Notify::new(),
                partitions: partitions.max(1),
            }),
            consumer: ConsumerSettings {
                group_id: "test-group".to_string(),
                client_id: "test-client".to_string(),
                auto_commit: false,
                offset_reset: OffsetReset::Earliest,
            },
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    /// A handle on the same log whose consumers use `settings`.
    #[must_use]
    pub fn with_consumer_settings(&self, settings: ConsumerSettings) -> Self {
        Self {
            consumer: settings,
            ..self.clone()
        }
    }

    /// A handle on the same log whose consumers return at most `max_batch`
    /// records per poll.
    #[must_use]
    pub fn with_max_batch(&self, max_batch: usize) -> Self {
        Self {
            max_batch: max_batch.max(1),
            ..self.clone()
        }
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let buckets = u64::try_from(self.shared.partitions).unwrap_or(1);
        i32::try_from(hasher.finish() % buckets).unwrap_or(0)
    }

    /// Append a record directly, bypassing encoding and failure injection.
    ///
    /// Used to plant poison records (no key, non-JSON payload, unknown
    /// version) on a topic.
    pub fn append_raw(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&str>,
        payload: Option<&[u8]>,
    ) -> RecordMetadata {
        let offset = self.shared.lock().append(
            topic,
            partition,
            PublishedRecord {
                key: key.map(ToString::to_string),
                payload: payload.map(<[u8]>::to_vec),
            },
            self.shared.partitions,
        );
        self.shared.appended.notify_waiters();
        RecordMetadata {
            topic: topic.to_string(),
            partition,
            offset,
        }
    }

    /// Every record on `topic`, partition by partition, in offset order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.shared.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, record)| LogRecord {
                    topic: topic.to_string(),
                    partition: i32::try_from(partition).unwrap_or(i32::MAX),
                    offset: i64::try_from(offset).unwrap_or(i64::MAX),
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                })
            })
            .collect()
    }

    /// Payloads on `topic` as UTF-8 strings.
    #[must_use]
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.records(topic)
            .into_iter()
            .filter_map(|r| r.payload)
            .map(|p| String::from_utf8_lossy(&p).into_owned())
            .collect()
    }

    /// Offset a group has committed for a partition (the next offset to read).
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Every commit made, in order, with the committing group.
    #[must_use]
    pub fn commit_history(&self) -> Vec<(String, CommitOffsets)> {
        self.shared.lock().commit_history.clone()
    }

    /// Make publishes to `topic` fail with `error` until healed.
    pub fn fail_topic(&self, topic: &str, error: EventBusError) {
        self.shared
            .lock()
            .topic_failures
            .insert(topic.to_string(), error);
    }

    /// Stop failing publishes to `topic`.
    pub fn heal_topic(&self, topic: &str) {
        self.shared.lock().topic_failures.remove(topic);
    }

    /// Make the next `count` polls fail.
    pub fn fail_next_polls(&self, count: usize) {
        self.shared.lock().poll_failures = count;
    }

    /// Make commits fail (or succeed again).
    pub fn fail_commits(&self, fail: bool) {
        self.shared.lock().fail_commits = fail;
    }

    /// Whether [`EventBus::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordMetadata, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.as_bytes().to_vec();

        Box::pin(async move {
            let partition = self.partition_for(&key);
            let offset = {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(EventBusError::Closed("producer closed".to_string()));
                }
                if let Some(error) = state.topic_failures.get(&topic) {
                    return Err(error.clone());
                }
                state.append(
                    &topic,
                    partition,
                    PublishedRecord {
                        key: Some(key),
                        payload: Some(payload),
                    },
                    self.shared.partitions,
                )
            };
            self.shared.appended.notify_waiters();

            Ok(RecordMetadata {
                topic,
                partition,
                offset,
            })
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, EventBusError>> + Send + '_>>
    {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics".to_string(),
                });
            }
            tracing::debug!(
                group = %self.consumer.group_id,
                ?topics,
                "In-memory consumer subscribed"
            );
            let consumer: Box<dyn LogConsumer> = Box::new(InMemoryConsumer {
                shared: Arc::clone(&self.shared),
                settings: self.consumer.clone(),
                topics,
                positions: HashMap::new(),
                max_batch: self.max_batch,
            });
            Ok(consumer)
        })
    }

    fn close(
        &self,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move {
            self.shared.lock().closed = true;
            Ok(())
        })
    }
}

/// Consumer over an [`InMemoryEventBus`] log.
struct InMemoryConsumer {
    shared: Arc<Shared>,
    settings: ConsumerSettings,
    topics: Vec<String>,
    positions: HashMap<(String, i32), i64>,
    max_batch: usize,
}

impl InMemoryConsumer {
    /// Take up to `max_batch` records from the current positions.
    fn fetch(&mut self) -> Result<Vec<LogRecord>, EventBusError> {
        let mut state = self.shared.lock();
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(EventBusError::PollFailed("injected poll failure".to_string()));
        }

        let mut batch = Vec::new();
        for topic in &self.topics {
            let partition_count = state
                .topics
                .get(topic)
                .map_or(self.shared.partitions, |p| i32::try_from(p.len()).unwrap_or(0));

            for partition in 0..partition_count {
                let log_len = state
                    .topics
                    .get(topic)
                    .and_then(|p| p.get(usize::try_from(partition).unwrap_or(0)))
                    .map_or(0, Vec::len);

                let position = match self.positions.get(&(topic.clone(), partition)) {
                    Some(position) => *position,
                    None => {
                        let committed = state.committed.get(&(
                            self.settings.group_id.clone(),
                            topic.clone(),
                            partition,
                        ));
                        let start = match (committed, self.settings.offset_reset) {
                            (Some(offset), _) => *offset,
                            (None, OffsetReset::Earliest) => 0,
                            (None, OffsetReset::Latest) => i64::try_from(log_len).unwrap_or(0),
                            (None, OffsetReset::Error) => {
                                return Err(EventBusError::PollFailed(format!(
                                    "no committed offset for {topic}/{partition}"
                                )));
                            }
                        };
                        self.positions.insert((topic.clone(), partition), start);
                        start
                    }
                };

                let Some(log) = state
                    .topics
                    .get(topic)
                    .and_then(|p| p.get(usize::try_from(partition).unwrap_or(0)))
                else {
                    continue;
                };

                let mut next = position;
                for record in log.iter().skip(usize::try_from(position).unwrap_or(0)) {
                    if batch.len() >= self.max_batch {
                        break;
                    }
                    batch.push(LogRecord {
                        topic: topic.clone(),
                        partition,
                        offset: next,
                        key: record.key.clone(),
                        payload: record.payload.clone(),
                    });
                    next += 1;
                }
                self.positions.insert((topic.clone(), partition), next);
            }
        }
        Ok(batch)
    }

    fn store_commit(
        shared: &Shared,
        group: &str,
        offsets: &CommitOffsets,
    ) -> Result<(), EventBusError> {
        let mut state = shared.lock();
        if state.fail_commits {
            return Err(EventBusError::CommitFailed("injected commit failure".to_string()));
        }
        for (topic, partition, next) in offsets.iter() {
            let entry = state
                .committed
                .entry((group.to_string(), topic.to_string(), partition))
                .or_insert(next);
            if next > *entry {
                *entry = next;
            }
        }
        state
            .commit_history
            .push((group.to_string(), offsets.clone()));
        Ok(())
    }
}

impl LogConsumer for InMemoryConsumer {
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventBusError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            let shared = Arc::clone(&self.shared);
            loop {
                // Register before fetching so an append in between is not missed
                let appended = shared.appended.notified();
                tokio::pin!(appended);
                appended.as_mut().enable();

                let batch = self.fetch()?;
                if !batch.is_empty() {
                    return Ok(batch);
                }
                if Instant::now() >= deadline {
                    return Ok(Vec::new());
                }
                let _ = tokio::time::timeout_at(deadline, appended).await;
            }
        })
    }

    fn commit(
        &mut self,
        offsets: CommitOffsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move { Self::store_commit(&self.shared, &self.settings.group_id, &offsets) })
    }

    fn close(
        self: Box<Self>,
        pending: CommitOffsets,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send>> {
        Box::pin(async move {
            if pending.is_empty() {
                return Ok(());
            }
            Self::store_commit(&self.shared, &self.settings.group_id, &pending)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_lands_on_same_partition_in_order() {
        let bus = InMemoryEventBus::new();
        let a = bus.publish("orders", "42", "first").await.expect("publish");
        let b = bus.publish("orders", "42", "second").await.expect("publish");
        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
    }

    #[tokio::test]
    async fn consumer_resumes_from_group_commit() {
        let bus = InMemoryEventBus::with_partitions(1);
        bus.publish("orders", "1", "a").await.expect("publish");
        bus.publish("orders", "1", "b").await.expect("publish");

        let mut consumer = bus.subscribe(&["orders"]).await.expect("subscribe");
        let batch = consumer.poll(Duration::from_millis(10)).await.expect("poll");
        assert_eq!(batch.len(), 2);

        let mut offsets = CommitOffsets::new();
        offsets.record(&batch[0]);
        consumer.commit(offsets).await.expect("commit");
        drop(consumer);

        // Only the second record was committed past, so it is redelivered
        let mut consumer = bus.subscribe(&["orders"]).await.expect("subscribe");
        let batch = consumer.poll(Duration::from_millis(10)).await.expect("poll");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload.as_deref(), Some(&b"b"[..]));
    }

    #[tokio::test]
    async fn latest_reset_skips_existing_records() {
        let bus = InMemoryEventBus::with_partitions(1);
        bus.publish("orders", "1", "old").await.expect("publish");

        let latest = bus.with_consumer_settings(ConsumerSettings {
            group_id: "fresh".to_string(),
            client_id: "c".to_string(),
            auto_commit: false,
            offset_reset: OffsetReset::Latest,
        });
        let mut consumer = latest.subscribe(&["orders"]).await.expect("subscribe");
        assert!(consumer.poll(Duration::from_millis(5)).await.expect("poll").is_empty());

        bus.publish("orders", "1", "new").await.expect("publish");
        let batch = consumer.poll(Duration::from_millis(50)).await.expect("poll");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].offset, 1);
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let bus = InMemoryEventBus::new();
        let mut consumer = bus.subscribe(&["orders"]).await.expect("subscribe");

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("orders", "9", "late").await
        });

        let batch = consumer.poll(Duration::from_secs(5)).await.expect("poll");
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_surface() {
        let bus = InMemoryEventBus::new();
        bus.fail_topic(
            "errors",
            EventBusError::BrokerUnavailable {
                topic: "errors".to_string(),
                reason: "down".to_string(),
            },
        );
        assert!(bus.publish("errors", "k", "x").await.is_err());
        bus.heal_topic("errors");
        assert!(bus.publish("errors", "k", "x").await.is_ok());

        let mut consumer = bus.subscribe(&["orders"]).await.expect("subscribe");
        bus.fail_next_polls(1);
        assert!(matches!(
            consumer.poll(Duration::from_millis(1)).await,
            Err(EventBusError::PollFailed(_))
        ));
        assert!(consumer.poll(Duration::from_millis(1)).await.is_ok());
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let bus = InMemoryEventBus::new();
        bus.close(Duration::from_secs(1)).await.expect("close");
        assert!(bus.is_closed());
        assert!(matches!(
            bus.publish("orders", "1", "x").await,
            Err(EventBusError::Closed(_))
        ));
    }
}
