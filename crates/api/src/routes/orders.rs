//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use inventory::InventoryStore;
use orders::{
    FulfillmentUpdate, NewOrder, Order, OrderPage, OrderQuery, OrderStore, PaymentUpdate,
    StatusChange, TransitionOutcome,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::extract::{Actor, ApiJson, ApiQuery, Tenant};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}

/// POST /orders: place an order and reserve its stock.
#[tracing::instrument(skip(state, request))]
pub async fn create<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Actor(actor): Actor,
    ApiJson(mut request): ApiJson<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    request.actor = actor;
    let order = state.orders.create_order(tenant, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: filtered, paginated listing, newest first.
pub async fn list<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    ApiQuery(query): ApiQuery<OrderQuery>,
) -> Result<Json<OrderPage>, ApiError> {
    Ok(Json(state.orders.list(tenant, &query).await?))
}

/// GET /orders/{id}
pub async fn get<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.get_by_id(tenant, order_id).await?))
}

/// GET /orders/by-number/{number}
pub async fn get_by_number<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Path(number): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.get_by_number(tenant, &number).await?))
}

/// POST /orders/{id}/status: move the order along the lifecycle.
#[tracing::instrument(skip(state, change))]
pub async fn update_status<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(mut change): ApiJson<StatusChange>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let order_id = parse_order_id(&id)?;
    change.actor = actor;
    Ok(Json(state.orders.update(tenant, order_id, change).await?))
}

/// POST /orders/{id}/payment
#[tracing::instrument(skip(state, update))]
pub async fn update_payment<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(mut update): ApiJson<PaymentUpdate>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    update.actor = actor;
    Ok(Json(
        state
            .orders
            .update_payment_status(tenant, order_id, update)
            .await?,
    ))
}

/// POST /orders/{id}/fulfillment
#[tracing::instrument(skip(state, update))]
pub async fn update_fulfillment<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(mut update): ApiJson<FulfillmentUpdate>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    update.actor = actor;
    Ok(Json(
        state
            .orders
            .update_fulfillment(tenant, order_id, update)
            .await?,
    ))
}

/// POST /orders/{id}/notes
pub async fn add_note<O: OrderStore + 'static, S: InventoryStore + 'static>(
    State(state): State<Arc<AppState<O, S>>>,
    Tenant(tenant): Tenant,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<NoteRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(
        state
            .orders
            .add_note(tenant, order_id, &request.note, actor)
            .await?,
    ))
}
