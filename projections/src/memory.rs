//! In-process materialized store.

use order_pipeline_core::order::OrderId;
use order_pipeline_core::projection::{OrderView, OrderViewStore, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// [`OrderViewStore`] backed by an ordered map.
///
/// Written only by the query consumer; read concurrently by query handlers.
/// Listing is ordered by order id, which for generated ids is creation order.
#[derive(Debug, Default)]
pub struct InMemoryOrderViewStore {
    views: RwLock<BTreeMap<OrderId, OrderView>>,
}

impl InMemoryOrderViewStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored views.
    pub async fn len(&self) -> usize {
        self.views.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.views.read().await.is_empty()
    }
}

impl OrderViewStore for InMemoryOrderViewStore {
    async fn get(&self, id: &OrderId) -> Result<Option<OrderView>> {
        Ok(self.views.read().await.get(id).cloned())
    }

    async fn put(&self, view: OrderView) -> Result<()> {
        self.views.write().await.insert(view.id.clone(), view);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<OrderView>> {
        Ok(self.views.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use order_pipeline_core::event_bus::LogPosition;
    use order_pipeline_core::order::OrderStatus;

    fn view(id: &str) -> OrderView {
        OrderView {
            id: OrderId::from(id),
            product_id: "P1".to_string(),
            quantity: 1,
            expected_delivery_date: "2025-01-01".to_string(),
            status: OrderStatus::Created,
            cancellation_reason: None,
            created_at_millis: 0,
            updated_at_millis: 0,
            last_applied: LogPosition {
                partition: 0,
                offset: 0,
            },
        }
    }

    #[tokio::test]
    async fn put_replaces_by_id() {
        let store = InMemoryOrderViewStore::new();
        store.put(view("1")).await.expect("put");

        let mut updated = view("1");
        updated.status = OrderStatus::Cancelled;
        store.put(updated.clone()).await.expect("put");

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&OrderId::from("1")).await.expect("get"), Some(updated));
    }

    #[tokio::test]
    async fn list_is_ordered_by_id() {
        let store = InMemoryOrderViewStore::new();
        store.put(view("1735689600002")).await.expect("put");
        store.put(view("1735689600001")).await.expect("put");

        let ids: Vec<_> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|v| v.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1735689600001", "1735689600002"]);
    }

    #[tokio::test]
    async fn missing_id_is_none() {
        let store = InMemoryOrderViewStore::new();
        assert!(store.is_empty().await);
        assert_eq!(store.get(&OrderId::from("nope")).await.expect("get"), None);
    }
}
