//! Inventory ledger endpoints. Variant-level records are addressed with
//! `?variant_id=`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{ProductId, VariantId};
use inventory::{InventoryRecord, InventoryStore, LowStockItem, StockSettings};
use orders::{OrderStore, ReservationDrift};
use serde::Deserialize;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery, Tenant};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VariantQuery {
    pub variant_id: Option<VariantId>,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

/// GET /inventory
pub async fn list<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<InventoryRecord>>, ApiError> {
    Ok(Json(state.ledger().records(tenant).await?))
}

/// GET /inventory/{product_id}
pub async fn get<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(product_id): Path<String>,
    ApiQuery(variant): ApiQuery<VariantQuery>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let record = state
        .ledger()
        .get(tenant, ProductId::new(product_id), variant.variant_id)
        .await?;
    Ok(Json(record))
}

/// PUT /inventory/{product_id}: absolute set of `available`.
#[tracing::instrument(skip(state))]
pub async fn set<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(product_id): Path<String>,
    ApiQuery(variant): ApiQuery<VariantQuery>,
    ApiJson(request): ApiJson<SetStockRequest>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let record = state
        .ledger()
        .set_stock(
            tenant,
            ProductId::new(product_id),
            variant.variant_id,
            request.quantity,
        )
        .await?;
    Ok(Json(record))
}

/// POST /inventory/{product_id}/adjust: relative change of `available`.
#[tracing::instrument(skip(state))]
pub async fn adjust<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(product_id): Path<String>,
    ApiQuery(variant): ApiQuery<VariantQuery>,
    ApiJson(request): ApiJson<AdjustStockRequest>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let record = state
        .ledger()
        .adjust_stock(
            tenant,
            ProductId::new(product_id),
            variant.variant_id,
            request.delta,
        )
        .await?;
    Ok(Json(record))
}

/// PUT /inventory/{product_id}/settings
pub async fn configure<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(product_id): Path<String>,
    ApiQuery(variant): ApiQuery<VariantQuery>,
    ApiJson(settings): ApiJson<StockSettings>,
) -> Result<Json<InventoryRecord>, ApiError> {
    let record = state
        .ledger()
        .configure(tenant, ProductId::new(product_id), variant.variant_id, settings)
        .await?;
    Ok(Json(record))
}

/// GET /inventory/low-stock
pub async fn low_stock<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<LowStockItem>>, ApiError> {
    Ok(Json(state.ledger().low_stock(tenant).await?))
}

/// GET /inventory/drift: keys whose reserved count disagrees with the orders.
pub async fn drift<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<ReservationDrift>>, ApiError> {
    Ok(Json(state.orders.reservation_drift(tenant).await?))
}
