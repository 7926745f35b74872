//! Read-store failure injection.
//!
//! [`FlakyOrderViewStore`] wraps any [`OrderViewStore`] and fails writes on
//! demand, so tests can drive the query consumer's retry and dead-letter
//! paths without a real database.

use order_pipeline_core::order::OrderId;
use order_pipeline_core::projection::{OrderView, OrderViewStore, ProjectionError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Store wrapper that fails `put` on demand.
///
/// # Example
///
/// ```ignore
/// let store = FlakyOrderViewStore::new(InMemoryOrderViewStore::new());
/// store.fail_next_puts(2); // the next two writes fail, then writes succeed
/// ```
#[derive(Debug)]
pub struct FlakyOrderViewStore<S> {
    inner: Arc<S>,
    failing_puts: AtomicUsize,
    always_fail: AtomicBool,
    put_attempts: AtomicUsize,
}

impl<S> FlakyOrderViewStore<S> {
    /// Wrap `inner`; no failures until configured.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self::shared(Arc::new(inner))
    }

    /// Wrap a store the test keeps its own handle to.
    #[must_use]
    pub fn shared(inner: Arc<S>) -> Self {
        Self {
            inner,
            failing_puts: AtomicUsize::new(0),
            always_fail: AtomicBool::new(false),
            put_attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` writes.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Fail every write until turned off.
    pub fn fail_all_puts(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Writes attempted so far, failed ones included.
    #[must_use]
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<S: OrderViewStore> OrderViewStore for FlakyOrderViewStore<S> {
    async fn get(&self, id: &OrderId) -> Result<Option<OrderView>> {
        self.inner.get(id).await
    }

    async fn put(&self, view: OrderView) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(ProjectionError::Storage(format!(
                "injected write failure for order {}",
                view.id
            )));
        }
        self.inner.put(view).await
    }

    async fn list(&self) -> Result<Vec<OrderView>> {
        self.inner.list().await
    }
}
