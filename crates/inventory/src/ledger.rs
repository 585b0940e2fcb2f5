//! Inventory ledger service.

use common::{ProductId, TenantId, VariantId};

use crate::{
    InventoryError, InventoryRecord, InventoryStore, LowStockItem, ProductCatalog, Result,
    StockKey, StockLine, StockSettings,
};

/// Batch stock operations over an [`InventoryStore`].
///
/// The ledger never reads a counter and then writes it back. Per-item
/// atomicity comes from the store; what the ledger adds is batch
/// compensation (a failed `reserve` puts back what it already took) and the
/// catalog stock mirror.
pub struct InventoryLedger<S, C> {
    store: S,
    catalog: C,
}

impl<S, C> InventoryLedger<S, C>
where
    S: InventoryStore,
    C: ProductCatalog,
{
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Reserves every line or none of them.
    ///
    /// Lines are reserved one by one with a conditional update each. If any
    /// line cannot be satisfied, the lines already reserved by this call are
    /// released again before the error is returned, so the ledger is left
    /// as it was.
    #[tracing::instrument(skip(self, lines), fields(%tenant_id, lines = lines.len()))]
    pub async fn reserve(&self, tenant_id: TenantId, lines: &[StockLine]) -> Result<()> {
        validate_lines(lines)?;
        metrics::counter!("inventory_reservations_total").increment(1);

        let mut reserved: Vec<(StockKey, u32)> = Vec::with_capacity(lines.len());
        for line in lines {
            let key = line.key(tenant_id);
            let failure = match self.store.try_reserve(&key, line.quantity).await {
                Ok(Some(_)) => {
                    reserved.push((key, line.quantity));
                    continue;
                }
                Ok(None) => {
                    let available = self.available_for_error(&key).await;
                    InventoryError::insufficient(&key, u64::from(line.quantity), available)
                }
                Err(e) => e,
            };

            metrics::counter!("inventory_reservation_failures_total").increment(1);
            tracing::info!(%key, quantity = line.quantity, error = %failure, "reservation failed");
            self.roll_back(&reserved).await;
            return Err(failure);
        }

        tracing::debug!("reservation complete");
        Ok(())
    }

    /// Returns reserved units to `available`.
    ///
    /// Floored per record: releasing more than is reserved only releases
    /// what is there, so a repeated release cannot drive `reserved` negative.
    #[tracing::instrument(skip(self, lines), fields(%tenant_id, lines = lines.len()))]
    pub async fn release(&self, tenant_id: TenantId, lines: &[StockLine]) -> Result<()> {
        validate_lines(lines)?;
        for line in lines {
            let key = line.key(tenant_id);
            if self.store.release(&key, line.quantity).await?.is_none() {
                tracing::warn!(%key, quantity = line.quantity, "release on missing inventory record");
            }
        }
        Ok(())
    }

    /// Permanently consumes reserved units (delivery).
    #[tracing::instrument(skip(self, lines), fields(%tenant_id, lines = lines.len()))]
    pub async fn confirm(&self, tenant_id: TenantId, lines: &[StockLine]) -> Result<()> {
        validate_lines(lines)?;
        for line in lines {
            let key = line.key(tenant_id);
            match self.store.confirm(&key, line.quantity).await? {
                Some(record) => self.mirror(&record).await,
                None => {
                    tracing::warn!(%key, quantity = line.quantity, "confirm on missing inventory record")
                }
            }
        }
        Ok(())
    }

    /// Administrative absolute set of `available`.
    #[tracing::instrument(skip(self))]
    pub async fn set_stock(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<InventoryRecord> {
        let key = StockKey::new(tenant_id, product_id, variant_id);
        let record = self.store.set_available(&key, quantity).await?;
        tracing::info!(%key, available = record.available, "stock set");
        self.mirror(&record).await;
        Ok(record)
    }

    /// Adds `delta` to `available`; a decrement that would overdraw fails
    /// with [`InventoryError::InsufficientStock`].
    #[tracing::instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        delta: i64,
    ) -> Result<InventoryRecord> {
        let key = StockKey::new(tenant_id, product_id, variant_id);
        match self.store.try_adjust(&key, delta).await? {
            Some(record) => {
                tracing::info!(%key, delta, available = record.available, "stock adjusted");
                self.mirror(&record).await;
                Ok(record)
            }
            None => {
                let available = self.available_for_error(&key).await;
                Err(InventoryError::insufficient(
                    &key,
                    delta.unsigned_abs(),
                    available,
                ))
            }
        }
    }

    pub async fn configure(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        settings: StockSettings,
    ) -> Result<InventoryRecord> {
        let key = StockKey::new(tenant_id, product_id, variant_id);
        self.store.configure(&key, &settings).await
    }

    pub async fn get(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
    ) -> Result<InventoryRecord> {
        let key = StockKey::new(tenant_id, product_id, variant_id);
        self.store
            .get(&key)
            .await?
            .ok_or(InventoryError::NotFound(key))
    }

    /// Every record of the tenant.
    pub async fn records(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>> {
        self.store.list(tenant_id).await
    }

    /// Records at or below their threshold, with the catalog display name.
    #[tracing::instrument(skip(self))]
    pub async fn low_stock(&self, tenant_id: TenantId) -> Result<Vec<LowStockItem>> {
        let records = self.store.low_stock(tenant_id).await?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let product_name = match self
                .catalog
                .snapshot(
                    tenant_id,
                    &record.key.product_id,
                    record.key.variant_id.as_ref(),
                )
                .await
            {
                Ok(snapshot) => snapshot.map(|s| s.name),
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "catalog lookup failed");
                    None
                }
            };
            items.push(LowStockItem {
                record,
                product_name,
            });
        }
        Ok(items)
    }

    async fn roll_back(&self, reserved: &[(StockKey, u32)]) {
        if reserved.is_empty() {
            return;
        }
        metrics::counter!("inventory_rollbacks_total").increment(1);
        for (key, quantity) in reserved.iter().rev() {
            if let Err(e) = self.store.release(key, *quantity).await {
                // Units stay reserved; a drift report will surface them.
                tracing::error!(%key, quantity, error = %e, "reservation rollback failed");
            }
        }
        tracing::warn!(items = reserved.len(), "partial reservation rolled back");
    }

    async fn available_for_error(&self, key: &StockKey) -> u32 {
        match self.store.get(key).await {
            Ok(record) => record.map(|r| r.available).unwrap_or(0),
            Err(_) => 0,
        }
    }

    async fn mirror(&self, record: &InventoryRecord) {
        let key = &record.key;
        if let Err(e) = self
            .catalog
            .mirror_stock(
                key.tenant_id,
                &key.product_id,
                key.variant_id.as_ref(),
                record.on_hand(),
            )
            .await
        {
            tracing::warn!(%key, error = %e, "catalog stock mirror failed");
        }
    }
}

fn validate_lines(lines: &[StockLine]) -> Result<()> {
    match lines.iter().find(|line| line.quantity == 0) {
        Some(line) => Err(InventoryError::Validation(format!(
            "quantity for product {} must be greater than zero",
            line.product_id
        ))),
        None => Ok(()),
    }
}
