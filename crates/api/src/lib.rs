//! HTTP API server with observability for the order-fulfillment core.
//!
//! Every order and inventory route is scoped to the tenant named in the
//! `x-tenant-id` header. Structured logging goes through `tracing` and
//! counters through the Prometheus recorder served at `/metrics`.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post, put};
use chrono::Utc;
use inventory::InventoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use orders::OrderStore;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, InMemoryState, PostgresState, in_memory_state, postgres_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<O, S>(state: Arc<AppState<O, S>>, metrics_handle: PrometheusHandle) -> Router
where
    O: OrderStore + 'static,
    S: InventoryStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<O, S>).get(routes::orders::list::<O, S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<O, S>))
        .route(
            "/orders/by-number/{number}",
            get(routes::orders::get_by_number::<O, S>),
        )
        .route(
            "/orders/{id}/status",
            post(routes::orders::update_status::<O, S>),
        )
        .route(
            "/orders/{id}/payment",
            post(routes::orders::update_payment::<O, S>),
        )
        .route(
            "/orders/{id}/fulfillment",
            post(routes::orders::update_fulfillment::<O, S>),
        )
        .route("/orders/{id}/notes", post(routes::orders::add_note::<O, S>))
        .route("/inventory", get(routes::inventory::list::<O, S>))
        .route(
            "/inventory/low-stock",
            get(routes::inventory::low_stock::<O, S>),
        )
        .route("/inventory/drift", get(routes::inventory::drift::<O, S>))
        .route(
            "/inventory/{product_id}",
            get(routes::inventory::get::<O, S>).put(routes::inventory::set::<O, S>),
        )
        .route(
            "/inventory/{product_id}/adjust",
            post(routes::inventory::adjust::<O, S>),
        )
        .route(
            "/inventory/{product_id}/settings",
            put(routes::inventory::configure::<O, S>),
        )
        .route("/catalog/{product_id}", put(routes::catalog::put::<O, S>))
        .route("/admin/sweep", post(routes::admin::sweep::<O, S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Runs the stale-checkout sweep every `interval` until the runtime stops.
pub fn spawn_sweeper<O, S>(state: Arc<AppState<O, S>>, interval: Duration) -> JoinHandle<()>
where
    O: OrderStore + 'static,
    S: InventoryStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            metrics::counter!("checkout_sweeps_total").increment(1);
            match state
                .orders
                .sweep_stale_checkouts(Utc::now(), state.checkout_timeout)
                .await
            {
                Ok(swept) if !swept.is_empty() => {
                    tracing::info!(count = swept.len(), "swept stale checkouts");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "checkout sweep failed"),
            }
        }
    })
}
