//! A consumer that delivers exactly what the test says.
//!
//! Real brokers never hand a single partition's records out of offset order,
//! so the in-memory log can't either. [`ScriptedLogConsumer`] can: each poll
//! returns the next scripted batch verbatim, which lets tests play the part
//! of a misbehaving harness (reordered offsets, redelivered records, poll
//! errors) and then inspect what the consumer under test committed.

use order_pipeline_core::event_bus::{CommitOffsets, EventBusError, LogConsumer, LogRecord};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct ScriptState {
    commits: Vec<CommitOffsets>,
    final_commit: Option<CommitOffsets>,
    closed: bool,
    polls: usize,
    fail_commits: bool,
}

/// Observes a [`ScriptedLogConsumer`] after it has been handed off.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
    drained: Arc<Notify>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commits made through [`LogConsumer::commit`], in order.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitOffsets> {
        self.lock().commits.clone()
    }

    /// What was passed to [`LogConsumer::close`], if it was called.
    #[must_use]
    pub fn final_commit(&self) -> Option<CommitOffsets> {
        self.lock().final_commit.clone()
    }

    /// Whether the consumer was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of polls made.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// Make commits fail (or succeed again).
    pub fn fail_commits(&self, fail: bool) {
        self.lock().fail_commits = fail;
    }

    /// Everything committed, merged, final commit included.
    #[must_use]
    pub fn all_committed(&self) -> CommitOffsets {
        let state = self.lock();
        let mut merged = CommitOffsets::new();
        for commit in &state.commits {
            merged.merge(commit);
        }
        if let Some(last) = &state.final_commit {
            merged.merge(last);
        }
        merged
    }

    /// Wait until every scripted step has been delivered.
    pub async fn wait_drained(&self) {
        self.drained.notified().await;
    }
}

/// One scripted poll result.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver these records
    Batch(Vec<LogRecord>),
    /// Fail the poll
    Fail(EventBusError),
}

/// [`LogConsumer`] that replays a script.
///
/// Once the script is exhausted, polls wait out their timeout and return
/// empty batches, like an idle partition.
#[derive(Debug)]
pub struct ScriptedLogConsumer {
    script: VecDeque<ScriptStep>,
    handle: ScriptHandle,
}

impl ScriptedLogConsumer {
    /// Build a consumer delivering `batches` in order.
    #[must_use]
    pub fn new(batches: Vec<Vec<LogRecord>>) -> (Self, ScriptHandle) {
        Self::from_steps(batches.into_iter().map(ScriptStep::Batch).collect())
    }

    /// Build a consumer from explicit steps.
    #[must_use]
    pub fn from_steps(steps: Vec<ScriptStep>) -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        (
            Self {
                script: steps.into(),
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl LogConsumer for ScriptedLogConsumer {
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventBusError>> + Send + '_>> {
        Box::pin(async move {
            self.handle.lock().polls += 1;
            match self.script.pop_front() {
                Some(ScriptStep::Batch(records)) => Ok(records),
                Some(ScriptStep::Fail(error)) => Err(error),
                None => {
                    self.handle.drained.notify_waiters();
                    tokio::time::sleep(timeout).await;
                    Ok(Vec::new())
                }
            }
        })
    }

    fn commit(
        &mut self,
        offsets: CommitOffsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.handle.lock();
            if state.fail_commits {
                return Err(EventBusError::CommitFailed("scripted commit failure".to_string()));
            }
            state.commits.push(offsets);
            Ok(())
        })
    }

    fn close(
        self: Box<Self>,
        pending: CommitOffsets,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send>> {
        Box::pin(async move {
            let mut state = self.handle.lock();
            state.closed = true;
            state.final_commit = Some(pending);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn record(offset: i64) -> LogRecord {
        LogRecord {
            topic: "orders".to_string(),
            partition: 0,
            offset,
            key: Some("1".to_string()),
            payload: None,
        }
    }

    #[tokio::test]
    async fn replays_batches_verbatim() {
        let (mut consumer, handle) = ScriptedLogConsumer::new(vec![vec![record(5), record(2)]]);
        let batch = consumer.poll(Duration::from_millis(1)).await.expect("poll");
        assert_eq!(batch.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![5, 2]);
        assert!(consumer.poll(Duration::from_millis(1)).await.expect("poll").is_empty());
        assert_eq!(handle.polls(), 2);
    }

    #[tokio::test]
    async fn records_commits_and_close() {
        let (mut consumer, handle) = ScriptedLogConsumer::new(vec![]);
        let mut offsets = CommitOffsets::new();
        offsets.record(&record(3));
        consumer.commit(offsets.clone()).await.expect("commit");

        Box::new(consumer)
            .close(CommitOffsets::new(), Duration::from_secs(1))
            .await
            .expect("close");

        assert_eq!(handle.commits(), vec![offsets]);
        assert!(handle.is_closed());
        assert_eq!(handle.all_committed().next_offset("orders", 0), Some(4));
    }
}
