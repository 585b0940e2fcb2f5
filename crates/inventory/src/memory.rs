use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::TenantId;
use tokio::sync::RwLock;

use crate::{
    InventoryError, InventoryRecord, InventoryStore, Result, StockKey, StockSettings,
};

/// In-memory inventory store.
///
/// Each primitive holds the write lock for the whole check-and-mutate, which
/// gives it the same row-level atomicity a database conditional update has.
/// The lock is private to the store; callers never hold it across awaits.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    records: Arc<RwLock<HashMap<StockKey, InventoryRecord>>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn adjust_overflow(key: &StockKey) -> InventoryError {
    InventoryError::Validation(format!("available count overflow for {key}"))
}

fn touch(record: &mut InventoryRecord) -> InventoryRecord {
    record.updated_at = Utc::now();
    record.clone()
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get(&self, key: &StockKey) -> Result<Option<InventoryRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn try_reserve(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(key) else {
            return Ok(None);
        };
        if record.available < quantity {
            return Ok(None);
        }
        let Some(reserved) = record.reserved.checked_add(quantity) else {
            return Err(InventoryError::Validation(format!(
                "reserved count overflow for {key}"
            )));
        };
        record.available -= quantity;
        record.reserved = reserved;
        Ok(Some(touch(record)))
    }

    async fn release(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(key) else {
            return Ok(None);
        };
        let moved = quantity.min(record.reserved);
        record.reserved -= moved;
        record.available = record.available.saturating_add(moved);
        Ok(Some(touch(record)))
    }

    async fn confirm(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(key) else {
            return Ok(None);
        };
        let moved = quantity.min(record.reserved);
        record.reserved -= moved;
        record.committed = record.committed.saturating_add(moved);
        Ok(Some(touch(record)))
    }

    async fn set_available(&self, key: &StockKey, quantity: u32) -> Result<InventoryRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| InventoryRecord::empty(key.clone()));
        record.available = quantity;
        Ok(touch(record))
    }

    async fn try_adjust(&self, key: &StockKey, delta: i64) -> Result<Option<InventoryRecord>> {
        let mut records = self.records.write().await;
        let current = match records.get(key) {
            Some(record) => record.available,
            None if delta < 0 => return Ok(None),
            None => 0,
        };

        let next = i64::from(current)
            .checked_add(delta)
            .ok_or_else(|| adjust_overflow(key))?;
        if next < 0 {
            return Ok(None);
        }
        let available = u32::try_from(next).map_err(|_| adjust_overflow(key))?;

        let record = records
            .entry(key.clone())
            .or_insert_with(|| InventoryRecord::empty(key.clone()));
        record.available = available;
        Ok(Some(touch(record)))
    }

    async fn configure(
        &self,
        key: &StockKey,
        settings: &StockSettings,
    ) -> Result<InventoryRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| InventoryRecord::empty(key.clone()));
        if let Some(incoming) = settings.incoming {
            record.incoming = incoming;
        }
        if let Some(threshold) = settings.low_stock_threshold {
            record.low_stock_threshold = threshold;
        }
        Ok(touch(record))
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records
            .values()
            .filter(|r| r.key.tenant_id == tenant_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.key
                .product_id
                .cmp(&b.key.product_id)
                .then_with(|| a.key.variant_id.cmp(&b.key.variant_id))
        });
        Ok(all)
    }

    async fn low_stock(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>> {
        let records = self.records.read().await;
        let mut low: Vec<_> = records
            .values()
            .filter(|r| r.key.tenant_id == tenant_id && r.is_low_stock())
            .cloned()
            .collect();
        low.sort_by(|a, b| {
            a.available
                .cmp(&b.available)
                .then_with(|| a.key.product_id.cmp(&b.key.product_id))
        });
        Ok(low)
    }
}
