//! Read model for the query side of CQRS.
//!
//! # Overview
//!
//! Projections are the **query side of CQRS**. The command side appends
//! events to the log; the query side folds them, per order, into an
//! [`OrderView`] held in an [`OrderViewStore`]. The view is derived state:
//! never written directly, always rebuildable from the log.
//!
//! # The Fold
//!
//! [`fold`] is a pure function `(current view, log position, envelope) →
//! outcome`. Its contract:
//!
//! - Ordering authority is the log position. A record at or before the last
//!   applied offset of the same partition is a redelivery and is skipped.
//!   `timestampMillis` never decides anything.
//! - `OrderCreated` for an unseen order creates the view; for a known order it
//!   is a duplicate and changes nothing.
//! - `OrderCancelled` for a known order sets the status; for an unseen order
//!   it is an orphan and is rejected.
//!
//! Applying the same record twice therefore leaves the view unchanged, which
//! is what at-least-once delivery requires.
//!
//! ```text
//! Write Side:                         Read Side:
//! ┌─────────────────┐                ┌─────────────────┐
//! │ CommandProducer │  orders topic  │  QueryConsumer  │
//! │                 │ ─────────────► │   fold + store  │
//! └─────────────────┘  key=order id  └─────────────────┘
//! ```

use crate::event::{EventEnvelope, OrderEvent};
use crate::event_bus::LogPosition;
use crate::order::{OrderId, OrderStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Error type for projection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// An update arrived for an order that has no view yet
    #[error("{event_type} for unknown order {order_id}")]
    Orphan {
        /// The order the event referred to
        order_id: OrderId,
        /// The event type that could not be applied
        event_type: &'static str,
    },

    /// A record could not be written to the errors topic
    #[error("Dead-letter publish failed: {0}")]
    DeadLetter(String),

    /// Subscribing to the source topics failed
    #[error("Subscription error: {0}")]
    Subscription(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Read-optimized view of one order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    /// Order identifier
    pub id: OrderId,

    /// Product ordered
    #[serde(rename = "productID")]
    pub product_id: String,

    /// Number of units
    pub quantity: i64,

    /// Expected delivery date (`YYYY-MM-DD`)
    #[serde(rename = "expectedDeliveryDate")]
    pub expected_delivery_date: String,

    /// Current lifecycle status
    pub status: OrderStatus,

    /// Set once the order is cancelled
    #[serde(rename = "cancellationReason", skip_serializing_if = "Option::is_none", default)]
    pub cancellation_reason: Option<String>,

    /// Producer timestamp of the creating event
    #[serde(rename = "createdAtMillis")]
    pub created_at_millis: i64,

    /// Producer timestamp of the last applied event
    #[serde(rename = "updatedAtMillis")]
    pub updated_at_millis: i64,

    /// Log position of the last applied event
    #[serde(rename = "lastApplied")]
    pub last_applied: LogPosition,
}

/// Why a record was applied without changing the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Position is at or before the last applied one
    Redelivered,
    /// `OrderCreated` for an order that already has a view
    DuplicateCreate,
    /// `OrderCancelled` for an order that is already cancelled
    AlreadyCancelled,
}

impl SkipReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redelivered => "redelivered",
            Self::DuplicateCreate => "duplicate_create",
            Self::AlreadyCancelled => "already_cancelled",
        }
    }
}

/// Result of folding one record into a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First event for the order; store this new view
    Created(OrderView),
    /// View changed; store the new version
    Updated(OrderView),
    /// Nothing to store
    Unchanged(SkipReason),
}

/// Fold one envelope, read at `position`, into the current view.
///
/// # Errors
///
/// Returns [`ProjectionError::Orphan`] if the event updates an order that has
/// no view.
pub fn fold(
    current: Option<&OrderView>,
    position: LogPosition,
    envelope: &EventEnvelope,
) -> Result<ApplyOutcome> {
    if let Some(view) = current {
        // Offsets are only comparable within a partition
        if view.last_applied.partition == position.partition
            && position.offset <= view.last_applied.offset
        {
            return Ok(ApplyOutcome::Unchanged(SkipReason::Redelivered));
        }
    }

    match (&envelope.event, current) {
        (
            OrderEvent::OrderCreated {
                order_id,
                product_id,
                quantity,
                expected_delivery_date,
            },
            None,
        ) => Ok(ApplyOutcome::Created(OrderView {
            id: order_id.clone(),
            product_id: product_id.clone(),
            quantity: *quantity,
            expected_delivery_date: expected_delivery_date.clone(),
            status: OrderStatus::Created,
            cancellation_reason: None,
            created_at_millis: envelope.timestamp_millis,
            updated_at_millis: envelope.timestamp_millis,
            last_applied: position,
        })),
        (OrderEvent::OrderCreated { .. }, Some(_)) => {
            Ok(ApplyOutcome::Unchanged(SkipReason::DuplicateCreate))
        }
        (OrderEvent::OrderCancelled { order_id, .. }, None) => Err(ProjectionError::Orphan {
            order_id: order_id.clone(),
            event_type: envelope.event_type(),
        }),
        (OrderEvent::OrderCancelled { .. }, Some(view))
            if view.status == OrderStatus::Cancelled =>
        {
            Ok(ApplyOutcome::Unchanged(SkipReason::AlreadyCancelled))
        }
        (OrderEvent::OrderCancelled { reason, .. }, Some(view)) => {
            Ok(ApplyOutcome::Updated(OrderView {
                status: OrderStatus::Cancelled,
                cancellation_reason: Some(reason.clone()),
                updated_at_millis: envelope.timestamp_millis,
                last_applied: position,
                ..view.clone()
            }))
        }
    }
}

/// Data-access object for materialized order views.
///
/// Mutated only by the query consumer's apply step; query handlers read it
/// concurrently and see eventually consistent state.
pub trait OrderViewStore: Send + Sync {
    /// Load the view for an order.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn get(&self, id: &OrderId) -> impl Future<Output = Result<Option<OrderView>>> + Send;

    /// Insert or replace the view for `view.id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn put(&self, view: OrderView) -> impl Future<Output = Result<()>> + Send;

    /// Load every view.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn list(&self) -> impl Future<Output = Result<Vec<OrderView>>> + Send;
}
