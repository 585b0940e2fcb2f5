use chrono::{DateTime, Utc};
use common::{ProductId, TenantId, VariantId};
use serde::{Deserialize, Serialize};

/// Threshold given to records that were never configured explicitly.
pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 5;

/// Identity of one inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl StockKey {
    pub fn new(
        tenant_id: TenantId,
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
    ) -> Self {
        Self {
            tenant_id,
            product_id: product_id.into(),
            variant_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.product_id)?;
        if let Some(variant) = &self.variant_id {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

/// Stock counters for one (tenant, product, variant).
///
/// `available + reserved` is the sellable stock that has not yet left the
/// building; `committed` only ever grows, through delivered orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub key: StockKey,
    pub available: u32,
    pub reserved: u32,
    pub committed: u32,
    pub incoming: u32,
    pub low_stock_threshold: u32,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// A zeroed record, as created lazily on the first stock write.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            available: 0,
            reserved: 0,
            committed: 0,
            incoming: 0,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            updated_at: Utc::now(),
        }
    }

    /// Units still physically on hand (not yet consumed by delivery).
    pub fn on_hand(&self) -> u32 {
        self.available.saturating_add(self.reserved)
    }

    pub fn is_low_stock(&self) -> bool {
        self.available <= self.low_stock_threshold
    }
}

/// One line of a reserve/release/confirm batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: impl Into<ProductId>, variant_id: Option<VariantId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
            quantity,
        }
    }

    pub fn key(&self, tenant_id: TenantId) -> StockKey {
        StockKey::new(tenant_id, self.product_id.clone(), self.variant_id.clone())
    }
}

/// Administrative settings; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    pub incoming: Option<u32>,
    pub low_stock_threshold: Option<u32>,
}

/// A record at or below its threshold, joined with the catalog display name.
#[derive(Debug, Clone, Serialize)]
pub struct LowStockItem {
    pub record: InventoryRecord,
    pub product_name: Option<String>,
}
