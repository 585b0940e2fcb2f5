use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, TenantId, Version};

use crate::error::StoreError;
use crate::order::Order;
use crate::query::{OrderPage, OrderQuery};
use crate::status::StockState;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for orders.
///
/// Lookups are tenant-scoped: an order belonging to another tenant is
/// reported as absent. Updates are compare-and-swap on [`Order::version`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order at its current version.
    ///
    /// Fails with [`StoreError::DuplicateOrderNumber`] if the tenant already
    /// has an order with the same number.
    async fn insert(&self, order: &Order) -> StoreResult<()>;

    async fn get(&self, tenant_id: TenantId, id: OrderId) -> StoreResult<Option<Order>>;

    async fn get_by_number(&self, tenant_id: TenantId, number: &str)
    -> StoreResult<Option<Order>>;

    /// Replaces the stored order if its version is still `expected`.
    ///
    /// Returns the new version. Fails with
    /// [`StoreError::ConcurrencyConflict`] if someone else wrote first.
    async fn update(&self, order: &Order, expected: Version) -> StoreResult<Version>;

    async fn list(&self, tenant_id: TenantId, query: &OrderQuery) -> StoreResult<OrderPage>;

    /// Orders in `state`, optionally limited to one tenant and to orders
    /// created before a cutoff. Oldest first.
    async fn find_by_stock_state(
        &self,
        tenant_id: Option<TenantId>,
        state: StockState,
        created_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Order>>;
}
