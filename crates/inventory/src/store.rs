use async_trait::async_trait;
use common::TenantId;

use crate::{InventoryRecord, Result, StockKey, StockSettings};

/// Atomic stock primitives exposed by a backing store.
///
/// Each method is one indivisible conditional update: the precondition and
/// the mutation are evaluated together by the store. Implementations must
/// never split them into a read followed by a write.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get(&self, key: &StockKey) -> Result<Option<InventoryRecord>>;

    /// Moves `quantity` from `available` to `reserved` if and only if
    /// `available >= quantity`.
    ///
    /// Returns `None` when the precondition fails or no record exists.
    async fn try_reserve(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>>;

    /// Moves up to `quantity` from `reserved` back to `available`, floored
    /// at the current `reserved` count. Returns `None` if no record exists.
    async fn release(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>>;

    /// Moves up to `quantity` from `reserved` to `committed`, floored at the
    /// current `reserved` count. Returns `None` if no record exists.
    async fn confirm(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>>;

    /// Sets `available` absolutely, creating the record if needed.
    async fn set_available(&self, key: &StockKey, quantity: u32) -> Result<InventoryRecord>;

    /// Adds `delta` to `available` if the result stays non-negative.
    ///
    /// A non-negative delta creates the record if needed. Returns `None` when
    /// a negative delta would overdraw the record (or no record exists).
    async fn try_adjust(&self, key: &StockKey, delta: i64) -> Result<Option<InventoryRecord>>;

    /// Upserts `incoming` / `low_stock_threshold`.
    async fn configure(&self, key: &StockKey, settings: &StockSettings)
    -> Result<InventoryRecord>;

    /// Every record of the tenant, ordered by product then variant.
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>>;

    /// Records of the tenant whose `available` is at or below their threshold.
    async fn low_stock(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>>;
}
