//! Axum integration for the order pipeline services.
//!
//! The command and query services are thin HTTP shells: handlers extract
//! the request, call into `order-pipeline-core` or the read store, and map
//! the result to a response. This crate holds the pieces both services
//! share.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the body with [`JsonBody`] (malformed JSON is a 400)
//! 3. **Call** the command producer or the read store
//! 4. **Map** failures through [`AppError`] to a status and plain-text reason
//!
//! # Example
//!
//! ```ignore
//! use order_pipeline_web::{AppError, JsonBody};
//!
//! async fn create_order(
//!     State(state): State<AppState>,
//!     JsonBody(request): JsonBody<CreateOrderRequest>,
//! ) -> Result<Json<Order>, AppError> {
//!     let (order, _) = state.producer.create_order(&request).await?;
//!     Ok(Json(order))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod shutdown;

pub use error::AppError;
pub use extractors::JsonBody;
pub use handlers::health_check;
pub use middleware::http_trace_layer;
pub use shutdown::shutdown_signal;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
