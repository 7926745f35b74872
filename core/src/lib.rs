//! # Order Pipeline Core
//!
//! Core types and contracts for a CQRS order-processing pipeline.
//!
//! The command side turns order-creation requests into versioned events and
//! publishes them onto a partitioned, ordered log. The query side consumes
//! that log and folds the events into a read-optimized view of each order.
//! This crate holds everything both sides must agree on:
//!
//! - [`config`]: broker connection configuration and parameter sets
//! - [`event`]: the versioned [`EventEnvelope`](event::EventEnvelope) and its JSON wire format
//! - [`event_bus`]: the broker seam ([`EventBus`](event_bus::EventBus) and [`LogConsumer`](event_bus::LogConsumer))
//! - [`order`]: the order domain (identifiers, status, creation request)
//! - [`projection`]: the read model and the per-key fold that builds it
//! - [`producer`]: the [`CommandProducer`](producer::CommandProducer)
//!
//! ## Data Flow
//!
//! ```text
//! HTTP ──► CommandProducer ──► orders topic (key = order id) ──► QueryConsumer ──► read store
//!                                                                     │
//!                                                                     └──► errors topic
//! ```
//!
//! ## Guarantees
//!
//! - All events for one order share a partition key and are totally ordered
//!   by their log offset.
//! - Nothing is ordered across different orders.
//! - Delivery to the read side is at-least-once; the fold is idempotent.

pub mod config;
pub mod event;
pub mod event_bus;
pub mod order;
pub mod producer;
pub mod projection;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Injected dependencies.
///
/// External effects the core needs are abstracted behind traits so tests can
/// substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use order_pipeline_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// assert!(clock.now_millis() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Milliseconds since the Unix epoch.
        fn now_millis(&self) -> i64 {
            self.now().timestamp_millis()
        }
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
