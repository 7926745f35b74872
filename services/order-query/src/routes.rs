//! HTTP routes of the query service.
//!
//! ```text
//! GET /orders       every materialized order, ordered by id
//! GET /orders/:id   one order, 404 if not (yet) materialized
//! GET /health       liveness
//! ```

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use order_pipeline_core::order::OrderId;
use order_pipeline_core::projection::{OrderView, OrderViewStore};
use order_pipeline_web::{health_check, http_trace_layer, AppError, WebResult};
use std::sync::Arc;

/// Build the query router over `store`.
pub fn build_router<S>(store: Arc<S>) -> Router
where
    S: OrderViewStore + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/orders", get(list_orders::<S>))
        .route("/orders/:id", get(get_order::<S>))
        .layer(http_trace_layer())
        .with_state(store)
}

/// `GET /orders`
///
/// # Errors
///
/// 500 if the store fails.
pub async fn list_orders<S: OrderViewStore>(
    State(store): State<Arc<S>>,
) -> WebResult<Json<Vec<OrderView>>> {
    Ok(Json(store.list().await?))
}

/// `GET /orders/:id`
///
/// # Errors
///
/// - 404 if no view exists for `id`
/// - 500 if the store fails
pub async fn get_order<S: OrderViewStore>(
    State(store): State<Arc<S>>,
    Path(id): Path<String>,
) -> WebResult<Json<OrderView>> {
    store
        .get(&OrderId::new(id.clone()))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Order", id))
}
