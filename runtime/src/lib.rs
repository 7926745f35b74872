//! # Order Pipeline Runtime
//!
//! Support code shared by the long-running parts of the pipeline.
//!
//! - [`retry`]: bounded retry with exponential backoff for transient failures
//!   (read-store writes, dead-letter publishes)
//! - [`metrics`]: metric descriptions and the optional Prometheus exporter

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;
