//! Operational endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use common::OrderId;
use inventory::InventoryStore;
use orders::OrderStore;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SweepResponse {
    pub swept: Vec<OrderId>,
}

/// POST /admin/sweep: run the stale-checkout sweep now, across tenants.
pub async fn sweep<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
) -> Result<Json<SweepResponse>, ApiError> {
    let swept = state
        .orders
        .sweep_stale_checkouts(Utc::now(), state.checkout_timeout)
        .await?;
    Ok(Json(SweepResponse { swept }))
}
