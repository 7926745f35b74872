//! Event envelope and wire format.
//!
//! Every record on the orders topic is a JSON object carrying envelope
//! metadata next to the type-specific payload fields:
//!
//! ```json
//! {
//!   "timestampMillis": 1735689600000,
//!   "type": "OrderCreated",
//!   "version": "1",
//!   "orderID": "1735689600000",
//!   "productID": "P1",
//!   "quantity": 2,
//!   "expectedDeliveryDate": "2025-01-01"
//! }
//! ```
//!
//! # Versioning
//!
//! `version` is carried through unchanged. Decoding checks it BEFORE looking
//! at the payload: a record whose version is not in [`SUPPORTED_VERSIONS`]
//! is rejected with [`EnvelopeError::UnsupportedVersion`] and never
//! guess-parsed.
//!
//! # Ordering
//!
//! `timestampMillis` is producer wall-clock metadata. It is never used to
//! order events; the log offset is.

use crate::order::OrderId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Schema version stamped on every envelope this crate produces.
pub const SCHEMA_VERSION: &str = "1";

/// Schema versions this crate knows how to decode.
pub const SUPPORTED_VERSIONS: &[&str] = &[SCHEMA_VERSION];

/// Event type discriminator for [`OrderEvent::OrderCreated`].
pub const ORDER_CREATED: &str = "OrderCreated";

/// Event type discriminator for [`OrderEvent::OrderCancelled`].
pub const ORDER_CANCELLED: &str = "OrderCancelled";

/// Event type discriminator for records on the errors topic.
pub const PROCESSING_FAILED: &str = "ProcessingFailed";

/// Error types for envelope encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Payload is not a structurally valid envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Envelope carries a schema version this consumer does not know
    #[error("Unsupported schema version: {0}")]
    UnsupportedVersion(String),

    /// Envelope carries an event type this consumer does not know
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    /// Failed to serialize an envelope
    #[error("Failed to encode envelope: {0}")]
    Encoding(String),
}

/// Domain events about orders.
///
/// The variant is the `type` discriminator on the wire; the fields are the
/// payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    /// An order was accepted by the command side.
    OrderCreated {
        /// Order identifier (also the partition key)
        #[serde(rename = "orderID")]
        order_id: OrderId,
        /// Product ordered
        #[serde(rename = "productID")]
        product_id: String,
        /// Number of units
        quantity: i64,
        /// Expected delivery date (`YYYY-MM-DD`)
        #[serde(rename = "expectedDeliveryDate")]
        expected_delivery_date: String,
    },

    /// An existing order was cancelled.
    OrderCancelled {
        /// Order identifier (also the partition key)
        #[serde(rename = "orderID")]
        order_id: OrderId,
        /// Why the order was cancelled
        reason: String,
    },
}

impl OrderEvent {
    /// The `type` discriminator for this event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => ORDER_CREATED,
            Self::OrderCancelled { .. } => ORDER_CANCELLED,
        }
    }

    /// The order this event is about.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::OrderCreated { order_id, .. } | Self::OrderCancelled { order_id, .. } => order_id,
        }
    }

    fn is_known_type(event_type: &str) -> bool {
        matches!(event_type, ORDER_CREATED | ORDER_CANCELLED)
    }
}

/// Envelope metadata read before the payload is interpreted.
#[derive(Deserialize)]
struct EnvelopeHeader {
    #[serde(rename = "timestampMillis")]
    #[allow(dead_code)]
    timestamp_millis: i64,
    #[serde(rename = "type")]
    event_type: String,
    version: String,
}

/// Versioned wrapper around one [`OrderEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Producer wall-clock time in milliseconds since the epoch
    #[serde(rename = "timestampMillis")]
    pub timestamp_millis: i64,

    /// Schema version of the payload
    pub version: String,

    /// The event itself (flattened: `type` plus payload fields)
    #[serde(flatten)]
    pub event: OrderEvent,
}

impl EventEnvelope {
    /// Wrap an event with the current schema version.
    ///
    /// # Examples
    ///
    /// ```
    /// use order_pipeline_core::event::{EventEnvelope, OrderEvent, SCHEMA_VERSION};
    /// use order_pipeline_core::order::OrderId;
    ///
    /// let envelope = EventEnvelope::new(
    ///     1_735_689_600_000,
    ///     OrderEvent::OrderCancelled {
    ///         order_id: OrderId::from("42"),
    ///         reason: "customer request".to_string(),
    ///     },
    /// );
    /// assert_eq!(envelope.version, SCHEMA_VERSION);
    /// assert_eq!(envelope.partition_key(), "42");
    /// ```
    #[must_use]
    pub fn new(timestamp_millis: i64, event: OrderEvent) -> Self {
        Self {
            timestamp_millis,
            version: SCHEMA_VERSION.to_string(),
            event,
        }
    }

    /// The `type` discriminator.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// The partition key: the order identifier.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        self.event.order_id().as_str()
    }

    /// Serialize to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encoding`] if serialization fails.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Encoding(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Malformed`] if the bytes are not an envelope, or the
    ///   payload does not match its declared type
    /// - [`EnvelopeError::UnsupportedVersion`] if the version is unknown
    /// - [`EnvelopeError::UnknownType`] if the type is unknown
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let header: EnvelopeHeader =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if !SUPPORTED_VERSIONS.contains(&header.version.as_str()) {
            return Err(EnvelopeError::UnsupportedVersion(header.version));
        }
        if !OrderEvent::is_known_type(&header.event_type) {
            return Err(EnvelopeError::UnknownType(header.event_type));
        }

        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventEnvelope {{ type: {}, version: {}, key: {} }}",
            self.event_type(),
            self.version,
            self.partition_key()
        )
    }
}

/// A record that could not be applied, as written to the errors topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// When the failure was recorded
    pub timestamp_millis: i64,
    /// Always [`PROCESSING_FAILED`]
    #[serde(rename = "type")]
    pub event_type: String,
    /// Schema version of this dead-letter record
    pub version: String,
    /// Topic the record was read from
    pub source_topic: String,
    /// Partition the record was read from
    pub partition: i32,
    /// Offset of the record
    pub offset: i64,
    /// Record key, if any
    pub key: Option<String>,
    /// Why the record was rejected
    pub reason: String,
    /// Original payload (lossy UTF-8)
    pub payload: Option<String>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn created() -> EventEnvelope {
        EventEnvelope::new(
            1_735_689_600_123,
            OrderEvent::OrderCreated {
                order_id: OrderId::from("1735689600000"),
                product_id: "P1".to_string(),
                quantity: 2,
                expected_delivery_date: "2025-01-01".to_string(),
            },
        )
    }

    #[test]
    fn encodes_flat_wire_object() {
        let json: serde_json::Value =
            serde_json::from_str(&created().encode().expect("encode")).expect("valid json");

        assert_eq!(json["type"], "OrderCreated");
        assert_eq!(json["version"], "1");
        assert_eq!(json["timestampMillis"], 1_735_689_600_123_i64);
        assert_eq!(json["orderID"], "1735689600000");
        assert_eq!(json["productID"], "P1");
        assert_eq!(json["quantity"], 2);
        assert_eq!(json["expectedDeliveryDate"], "2025-01-01");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let envelope = created();
        let encoded = envelope.encode().expect("encode");
        assert_eq!(EventEnvelope::decode(encoded.as_bytes()), Ok(envelope));
    }

    #[test]
    fn unknown_version_is_rejected_before_payload() {
        // Payload is garbage for OrderCreated, but the version check comes first
        let raw = br#"{"timestampMillis":1,"type":"OrderCreated","version":"2","shape":"new"}"#;
        assert_eq!(
            EventEnvelope::decode(raw),
            Err(EnvelopeError::UnsupportedVersion("2".to_string()))
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = br#"{"timestampMillis":1,"type":"OrderTeleported","version":"1","orderID":"7"}"#;
        assert_eq!(
            EventEnvelope::decode(raw),
            Err(EnvelopeError::UnknownType("OrderTeleported".to_string()))
        );
    }

    #[test]
    fn structural_mismatch_is_malformed() {
        let raw = br#"{"timestampMillis":1,"type":"OrderCreated","version":"1","orderID":"7","quantity":"two"}"#;
        assert!(matches!(
            EventEnvelope::decode(raw),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            EventEnvelope::decode(b"\xff\xfenot json"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            EventEnvelope::decode(b"[1,2,3]"),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let raw = br#"{"timestampMillis":5,"type":"OrderCancelled","version":"1","orderID":"7","reason":"late","traceId":"abc"}"#;
        let envelope = EventEnvelope::decode(raw).expect("decode");
        assert_eq!(envelope.event_type(), ORDER_CANCELLED);
        assert_eq!(envelope.partition_key(), "7");
    }

    #[test]
    fn display_names_type_and_key() {
        let rendered = created().to_string();
        assert!(rendered.contains("OrderCreated"));
        assert!(rendered.contains("1735689600000"));
    }
}
