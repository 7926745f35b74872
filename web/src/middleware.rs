//! Request tracing for the order services.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use order_pipeline_web::middleware::http_trace_layer;
//!
//! let app = Router::new()
//!     .route("/orders", post(create_order))
//!     .layer(http_trace_layer());
//! ```

use axum::{body::Body, http::Request};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Span constructor used by [`http_trace_layer`].
pub type MakeRequestSpan = fn(&Request<Body>) -> tracing::Span;

/// Layer opening one `http_request` span per request and logging the
/// response status and latency at `INFO`.
#[must_use]
pub fn http_trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, MakeRequestSpan>
{
    TraceLayer::new_for_http()
        .make_span_with(request_span as MakeRequestSpan)
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
    )
}
