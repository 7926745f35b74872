//! HTTP routes of the command service.
//!
//! ```text
//! POST /orders              create an order, 200 with the order once acknowledged
//! POST /orders/:id/cancel   request cancellation, 202 once acknowledged
//! GET  /health              liveness
//! ```
//!
//! Both commands answer only after the broker has acknowledged the event.
//! A caller that sees a success status knows the event is on the log; a
//! publish failure is a 503 or 504 and never a success.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use order_pipeline_core::order::{CreateOrderRequest, Order, OrderId};
use order_pipeline_core::producer::CommandProducer;
use order_pipeline_web::{health_check, http_trace_layer, JsonBody, WebResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state of the command handlers.
#[derive(Clone)]
pub struct AppState {
    /// Producer shared by every request
    pub producer: Arc<CommandProducer>,
}

impl AppState {
    /// Create the state around a producer.
    #[must_use]
    pub const fn new(producer: Arc<CommandProducer>) -> Self {
        Self { producer }
    }
}

/// Body of `POST /orders/:id/cancel`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderRequest {
    /// Why the order is cancelled
    pub reason: String,
}

/// Response of `POST /orders/:id/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelAccepted {
    /// Order the cancellation was recorded for
    pub id: OrderId,
    /// Reason carried by the event
    pub reason: String,
}

/// Build the command router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(create_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .layer(http_trace_layer())
        .with_state(state)
}

/// `POST /orders`
///
/// # Errors
///
/// - 400 if the request is malformed or invalid; nothing is published
/// - 503 if the broker could not take the event
/// - 504 if the broker did not acknowledge in time
pub async fn create_order(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CreateOrderRequest>,
) -> WebResult<Json<Order>> {
    let (order, metadata) = state.producer.create_order(&request).await?;
    tracing::info!(
        order_id = %order.id,
        partition = metadata.partition,
        offset = metadata.offset,
        "Order created"
    );
    Ok(Json(order))
}

/// `POST /orders/:id/cancel`
///
/// # Errors
///
/// Same mapping as [`create_order`].
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<CancelOrderRequest>,
) -> WebResult<(StatusCode, Json<CancelAccepted>)> {
    let id = OrderId::new(id);
    state
        .producer
        .cancel_order(id.clone(), &request.reason)
        .await?;
    tracing::info!(order_id = %id, "Order cancellation accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelAccepted {
            id,
            reason: request.reason,
        }),
    ))
}
