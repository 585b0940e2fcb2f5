//! Product snapshots for the in-memory catalog.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use inventory::{InventoryStore, ProductSnapshot};
use orders::OrderStore;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery, Tenant};
use crate::routes::inventory::VariantQuery;
use crate::state::AppState;

/// PUT /catalog/{product_id}: register or replace a product snapshot.
pub async fn put<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(product_id): Path<String>,
    ApiQuery(variant): ApiQuery<VariantQuery>,
    ApiJson(snapshot): ApiJson<ProductSnapshot>,
) -> Result<Json<ProductSnapshot>, ApiError> {
    if snapshot.name.trim().is_empty() {
        return Err(ApiError::BadRequest("product name cannot be empty".to_string()));
    }
    if snapshot.unit_price.is_negative() {
        return Err(ApiError::BadRequest("unit price cannot be negative".to_string()));
    }
    state
        .catalog()
        .insert(tenant, ProductId::new(product_id), variant.variant_id, snapshot.clone())
        .await;
    Ok(Json(snapshot))
}
