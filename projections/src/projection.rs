//! Apply decoded events to the read store.

use order_pipeline_core::event::EventEnvelope;
use order_pipeline_core::event_bus::LogPosition;
use order_pipeline_core::projection::{fold, ApplyOutcome, OrderViewStore, Result};
use std::sync::Arc;

/// The order read model: load, fold, store.
///
/// Applying is idempotent, so the whole step can be retried after a store
/// failure without double-applying anything.
#[derive(Debug)]
pub struct OrderProjection<S> {
    store: Arc<S>,
}

impl<S> Clone for OrderProjection<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: OrderViewStore> OrderProjection<S> {
    /// Project into `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply one envelope read at `position`.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Storage`](order_pipeline_core::projection::ProjectionError::Storage)
    ///   if the store fails
    /// - [`ProjectionError::Orphan`](order_pipeline_core::projection::ProjectionError::Orphan)
    ///   if the event updates an order with no view
    pub async fn apply(
        &self,
        position: LogPosition,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome> {
        let order_id = envelope.event.order_id();
        let current = self.store.get(order_id).await?;
        let outcome = fold(current.as_ref(), position, envelope)?;

        match &outcome {
            ApplyOutcome::Created(view) | ApplyOutcome::Updated(view) => {
                self.store.put(view.clone()).await?;
                metrics::counter!("order_events_applied_total", "type" => envelope.event_type())
                    .increment(1);
                tracing::debug!(
                    order_id = %order_id,
                    event_type = envelope.event_type(),
                    partition = position.partition,
                    offset = position.offset,
                    status = %view.status,
                    "Applied event"
                );
            }
            ApplyOutcome::Unchanged(reason) => {
                metrics::counter!("order_events_skipped_total", "reason" => reason.as_str())
                    .increment(1);
                tracing::debug!(
                    order_id = %order_id,
                    event_type = envelope.event_type(),
                    partition = position.partition,
                    offset = position.offset,
                    reason = reason.as_str(),
                    "Skipped event"
                );
            }
        }

        Ok(outcome)
    }
}
