//! Error types for web handlers.
//!
//! [`AppError`] bridges domain errors and HTTP responses. Bodies are plain
//! text: the reason is meant for whoever sent the request, and server-side
//! detail stays in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use order_pipeline_core::producer::ProducerError;
use order_pipeline_core::projection::ProjectionError;
use std::fmt;

/// Application error type for web handlers.
///
/// # Status mapping
///
/// | failure | status |
/// |---|---|
/// | invalid request | 400 |
/// | unknown order | 404 |
/// | broker unavailable | 503 |
/// | publish timeout | 504 |
/// | anything else | 500 |
///
/// # Examples
///
/// ```ignore
/// async fn handler(Path(id): Path<String>) -> Result<Json<OrderView>, AppError> {
///     let view = store.get(&id.into()).await?
///         .ok_or_else(|| AppError::not_found("Order", &id))?;
///     Ok(Json(view))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String) -> Self {
        Self {
            status,
            message,
            source: None,
        }
    }

    /// Attach the underlying error, logged but never sent to the client.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing reason.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into())
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message.into())
    }

    /// Create a 504 Gateway Timeout error.
    #[must_use]
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message.into())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| -> &(dyn std::error::Error + 'static) { &**e })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    message = %self.message,
                    "Request failed"
                ),
            }
        } else {
            tracing::debug!(status = %self.status, message = %self.message, "Request rejected");
        }

        metrics::counter!("http_errors_total", "status" => self.status.as_u16().to_string())
            .increment(1);

        (self.status, self.message).into_response()
    }
}

impl From<ProducerError> for AppError {
    fn from(err: ProducerError) -> Self {
        match err {
            ProducerError::Validation(reason) => Self::bad_request(reason.to_string()),
            err @ ProducerError::PublishTimeout { .. } => {
                Self::gateway_timeout("Timed out waiting for the broker to acknowledge the order")
                    .with_source(err)
            },
            err @ ProducerError::BrokerUnavailable(_) => {
                Self::unavailable("The order could not be published").with_source(err)
            },
            err @ ProducerError::Encoding(_) => {
                Self::internal("An internal error occurred").with_source(err)
            },
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(err: ProjectionError) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
