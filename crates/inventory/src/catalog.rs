//! Product catalog collaborator.
//!
//! The catalog owns product names and prices; the ledger owns stock. Items
//! are snapshotted from the catalog when an order is created, and the
//! catalog receives an on-hand mirror after stock writes so storefront
//! display stays close to the ledger without becoming the system of record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId, TenantId, VariantId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CatalogError;

/// Price and display data copied into an order line at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub unit_price: Money,
    pub image_url: Option<String>,
}

impl ProductSnapshot {
    pub fn new(name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            name: name.into(),
            unit_price,
            image_url: None,
        }
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Tenant-scoped lookup; a product of another tenant is `None`.
    async fn snapshot(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<ProductSnapshot>, CatalogError>;

    /// Receives the ledger's on-hand count (`available + reserved`).
    async fn mirror_stock(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        on_hand: u32,
    ) -> Result<(), CatalogError>;
}

type CatalogKey = (TenantId, ProductId, Option<VariantId>);

#[derive(Default)]
struct CatalogState {
    products: HashMap<CatalogKey, ProductSnapshot>,
    mirrored: HashMap<CatalogKey, u32>,
}

/// In-memory catalog for tests and the standalone server.
#[derive(Clone, Default)]
pub struct InMemoryProductCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a product. A `None` variant entry also serves as the
    /// fallback for variants without their own entry.
    pub async fn insert(
        &self,
        tenant_id: TenantId,
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
        snapshot: ProductSnapshot,
    ) {
        self.state
            .write()
            .await
            .products
            .insert((tenant_id, product_id.into(), variant_id), snapshot);
    }

    /// Last on-hand count mirrored for the product.
    pub async fn mirrored_stock(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Option<u32> {
        self.state
            .read()
            .await
            .mirrored
            .get(&(tenant_id, product_id.clone(), variant_id.cloned()))
            .copied()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn snapshot(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<ProductSnapshot>, CatalogError> {
        let state = self.state.read().await;
        let exact = state
            .products
            .get(&(tenant_id, product_id.clone(), variant_id.cloned()));
        let fallback = || state.products.get(&(tenant_id, product_id.clone(), None));
        Ok(exact.or_else(fallback).cloned())
    }

    async fn mirror_stock(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        on_hand: u32,
    ) -> Result<(), CatalogError> {
        self.state
            .write()
            .await
            .mirrored
            .insert((tenant_id, product_id.clone(), variant_id.cloned()), on_hand);
        Ok(())
    }
}
