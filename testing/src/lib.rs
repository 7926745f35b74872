//! # Order Pipeline Testing
//!
//! Testing utilities for the order pipeline.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: a partitioned, offset-addressed log with consumer
//!   groups, committed offsets and failure injection
//! - [`ScriptedLogConsumer`]: a consumer that delivers whatever batches a test
//!   scripts, in whatever order, and records commits
//! - [`FlakyOrderViewStore`]: wraps any read store and fails on demand
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use order_pipeline_core::environment::Clock;
//! use order_pipeline_core::event_bus::EventBus;
//! use order_pipeline_testing::{InMemoryEventBus, test_clock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryEventBus::new();
//! let metadata = bus.publish("orders", "42", "{}").await?;
//! assert_eq!(bus.records("orders").len(), 1);
//! assert_eq!(metadata.offset, 0);
//! assert_eq!(test_clock().now_millis(), 1_735_689_600_000);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use order_pipeline_core::environment::Clock;

pub mod event_bus_mocks;
pub mod projection_mocks;
pub mod scripted_consumer;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to.
    ///
    /// # Example
    ///
    /// ```
    /// use order_pipeline_testing::mocks::FixedClock;
    /// use order_pipeline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        millis: AtomicI64,
    }

    impl FixedClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(time.timestamp_millis()),
            }
        }

        /// Move the clock by `millis` (negative values move it back, to
        /// simulate skew).
        pub fn advance_millis(&self, millis: i64) {
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
                .unwrap_or(DateTime::UNIX_EPOCH)
        }
    }

    /// Fixed clock at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::from_timestamp_millis(1_735_689_600_000).unwrap_or(DateTime::UNIX_EPOCH),
        )
    }
}

/// Install a `tracing` subscriber writing to the test output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use event_bus_mocks::{InMemoryEventBus, PublishedRecord};
pub use mocks::{FixedClock, test_clock};
pub use projection_mocks::FlakyOrderViewStore;
pub use scripted_consumer::{ScriptHandle, ScriptStep, ScriptedLogConsumer};
