//! Query side of the order pipeline.
//!
//! # Overview
//!
//! This crate turns the orders topic into a read model:
//! - [`QueryConsumer`]: the poll loop. Polls in bounded batches, routes
//!   poison records to the errors topic, applies the rest, commits offsets
//!   only after a whole batch succeeded, and shuts down with a final commit.
//! - [`OrderProjection`]: applies one decoded envelope to the store through
//!   the pure fold in `order_pipeline_core::projection`.
//! - [`InMemoryOrderViewStore`]: the materialized store served by the query
//!   API.
//!
//! # CQRS Separation
//!
//! ```text
//! orders topic  →  QueryConsumer  →  OrderProjection  →  OrderViewStore  ←  GET /orders
//!                        │
//!                        └──► errors topic (poison records)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryOrderViewStore::new());
//! let (consumer, shutdown) = QueryConsumer::new(
//!     OrderProjection::new(Arc::clone(&store)),
//!     bus,
//!     QueryConsumerConfig::new("orders", "errors"),
//!     Arc::new(SystemClock),
//! );
//!
//! let task = tokio::spawn(consumer.run());
//! // ...
//! shutdown.send(true).ok();
//! task.await??;
//! ```

pub mod consumer;
pub mod memory;
pub mod projection;

pub use consumer::{ConsumerReport, QueryConsumer, QueryConsumerConfig};
pub use memory::InMemoryOrderViewStore;
pub use projection::OrderProjection;
