//! Shared application state.

use std::sync::Arc;

use inventory::{
    InMemoryInventoryStore, InMemoryProductCatalog, InventoryLedger, InventoryStore,
    PostgresInventoryStore,
};
use orders::{InMemoryOrderStore, OrderService, OrderStore, PostgresOrderStore};
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state accessible from all handlers.
///
/// The catalog is held in memory: products are registered through
/// `PUT /catalog/{product_id}` by whatever owns them upstream.
pub struct AppState<O, S> {
    pub orders: OrderService<O, S, InMemoryProductCatalog>,
    pub checkout_timeout: chrono::Duration,
}

impl<O, S> AppState<O, S>
where
    O: OrderStore,
    S: InventoryStore,
{
    pub fn new(orders: O, stock: S, catalog: InMemoryProductCatalog, config: &Config) -> Self {
        let ledger = Arc::new(InventoryLedger::new(stock, catalog));
        Self {
            orders: OrderService::new(orders, ledger),
            checkout_timeout: config.checkout_timeout(),
        }
    }

    pub fn ledger(&self) -> &InventoryLedger<S, InMemoryProductCatalog> {
        self.orders.ledger()
    }

    pub fn catalog(&self) -> &InMemoryProductCatalog {
        self.ledger().catalog()
    }
}

pub type InMemoryState = AppState<InMemoryOrderStore, InMemoryInventoryStore>;
pub type PostgresState = AppState<PostgresOrderStore, PostgresInventoryStore>;

/// State backed entirely by in-process stores.
pub fn in_memory_state(config: &Config) -> Arc<InMemoryState> {
    Arc::new(AppState::new(
        InMemoryOrderStore::new(),
        InMemoryInventoryStore::new(),
        InMemoryProductCatalog::new(),
        config,
    ))
}

/// State backed by Postgres. Migrations must already have run.
pub fn postgres_state(pool: PgPool, config: &Config) -> Arc<PostgresState> {
    Arc::new(AppState::new(
        PostgresOrderStore::new(pool.clone()),
        PostgresInventoryStore::new(pool),
        InMemoryProductCatalog::new(),
        config,
    ))
}
