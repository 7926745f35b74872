//! Prometheus metrics for the order pipeline.
//!
//! Metric names are described once in [`describe_metrics`]; the producer and
//! consumer record them through the `metrics` facade wherever they are. With
//! no recorder installed the calls are no-ops, so the exporter is optional.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_pipeline_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Environment variable holding the exporter bind address.
pub const METRICS_ADDR_VAR: &str = "METRICS_ADDR";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Bind address is not a socket address
    #[error("Invalid metrics address '{0}'")]
    Address(String),
}

/// Prometheus exporter serving `/metrics` over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Build a server from `METRICS_ADDR`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Address`] if the variable is set but unparsable.
    pub fn from_env() -> Result<Option<Self>, MetricsError> {
        match std::env::var(METRICS_ADDR_VAR) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map(|addr| Some(Self::new(addr)))
                .map_err(|_| MetricsError::Address(raw)),
            _ => Ok(None),
        }
    }

    /// Describe metrics, install the global recorder and spawn the HTTP
    /// listener on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or a recorder is
    /// already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        describe_metrics();

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics exporter listening");
        Ok(())
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register descriptions for every metric the pipeline records.
pub fn describe_metrics() {
    // Command side
    describe_counter!(
        "order_events_published_total",
        "Events acknowledged by the broker, by event type"
    );
    describe_counter!(
        "order_publish_errors_total",
        "Commands that did not produce an acknowledged event, by event type and failure kind"
    );
    describe_histogram!(
        "order_publish_duration_seconds",
        "Time from publish to broker acknowledgment"
    );

    // Query side
    describe_counter!(
        "order_events_applied_total",
        "Events that changed the read model, by event type"
    );
    describe_counter!(
        "order_events_skipped_total",
        "Events applied without effect (redelivery, duplicate), by reason"
    );
    describe_counter!(
        "order_events_dead_lettered_total",
        "Records routed to the errors topic, by failure kind"
    );
    describe_counter!(
        "consumer_batches_committed_total",
        "Batches whose offsets were committed"
    );
    describe_counter!(
        "consumer_commit_errors_total",
        "Offset commits rejected by the broker"
    );
    describe_counter!(
        "consumer_poll_errors_total",
        "Polls that failed at the transport level"
    );

    // HTTP
    describe_counter!(
        "http_errors_total",
        "Requests answered with an error status, by status code"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }

    #[test]
    fn describing_without_recorder_is_noop() {
        describe_metrics();
    }

    #[tokio::test]
    async fn started_server_renders_recorded_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        // Another test binary may own the global recorder; only assert when
        // this one installed it.
        if server.start().is_ok() {
            metrics::counter!("order_events_published_total", "type" => "OrderCreated")
                .increment(1);
            let rendered = server.render().unwrap();
            assert!(rendered.contains("order_events_published_total"));
        }
    }
}
