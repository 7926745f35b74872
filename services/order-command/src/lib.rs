//! Command side of the order pipeline.
//!
//! Accepts order requests over HTTP, validates them, and publishes one
//! versioned event per command onto the orders topic, keyed by order id.
//! The response is sent after the broker acknowledges the event.

#![forbid(unsafe_code)]

pub mod config;
pub mod routes;

pub use config::Config;
pub use routes::{build_router, AppState};
