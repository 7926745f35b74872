//! Order domain types.
//!
//! The command side owns an [`Order`] only for the instant it is created: the
//! order is built from a validated [`CreateOrderRequest`], emitted as an
//! event, and never mutated afterwards. Everything later in its life is a new
//! event on the log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Unique identifier for an order.
///
/// Also the partition key for every event about the order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new `OrderId`.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self(id)
    }

    /// Get the inner value as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Generates order identifiers from the creation time.
///
/// Identifiers are the creation time in milliseconds since the epoch, rendered
/// as a decimal string. Two commands in the same millisecond would collide, so
/// the generator never hands out a value less than or equal to the last one:
/// on a collision it bumps to `last + 1`.
#[derive(Debug, Default)]
pub struct OrderIdGenerator {
    last: AtomicI64,
}

impl OrderIdGenerator {
    /// Create a generator with no history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Produce the identifier for an order created at `now_millis`.
    pub fn next_id(&self, now_millis: i64) -> OrderId {
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if now_millis > current {
                now_millis
            } else {
                current + 1
            };
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return OrderId::new(candidate.to_string()),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Lifecycle status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted by the command side
    Created,
    /// Cancelled after creation
    Cancelled,
}

impl OrderStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a creation request is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Product identifier is empty
    #[error("productID must not be empty")]
    MissingProduct,

    /// Quantity is zero or negative
    #[error("quantity must be greater than zero, got {0}")]
    InvalidQuantity(i64),

    /// Delivery date is not an ISO-8601 calendar date
    #[error("expectedDeliveryDate must be a date in YYYY-MM-DD form, got '{0}'")]
    InvalidDeliveryDate(String),

    /// Cancellation without a reason
    #[error("reason must not be empty")]
    MissingReason,
}

/// Request to create an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Product being ordered
    #[serde(rename = "productID")]
    pub product_id: String,

    /// Number of units
    pub quantity: i64,

    /// Expected delivery date (`YYYY-MM-DD`)
    #[serde(rename = "expectedDeliveryDate")]
    pub expected_delivery_date: String,
}

impl CreateOrderRequest {
    /// Check the request is well formed.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.product_id.trim().is_empty() {
            return Err(ValidationError::MissingProduct);
        }
        if self.quantity <= 0 {
            return Err(ValidationError::InvalidQuantity(self.quantity));
        }
        if chrono::NaiveDate::parse_from_str(&self.expected_delivery_date, "%Y-%m-%d").is_err() {
            return Err(ValidationError::InvalidDeliveryDate(
                self.expected_delivery_date.clone(),
            ));
        }
        Ok(())
    }
}

/// An order as created by the command side.
///
/// This is also the representation returned to the caller of `POST /orders`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,

    /// Product being ordered
    #[serde(rename = "productID")]
    pub product_id: String,

    /// Number of units
    pub quantity: i64,

    /// Expected delivery date (`YYYY-MM-DD`)
    #[serde(rename = "expectedDeliveryDate")]
    pub expected_delivery_date: String,

    /// Lifecycle status
    pub status: OrderStatus,
}

impl Order {
    /// Build a freshly created order from a request.
    #[must_use]
    pub fn created(id: OrderId, request: &CreateOrderRequest) -> Self {
        Self {
            id,
            product_id: request.product_id.clone(),
            quantity: request.quantity,
            expected_delivery_date: request.expected_delivery_date.clone(),
            status: OrderStatus::Created,
        }
    }
}
