//! Inventory ledger for the order-fulfillment core.
//!
//! Stock is tracked per (tenant, product, variant) across four counters:
//! `available`, `reserved`, `committed` and `incoming`. Every mutation is a
//! single conditional update against the backing store, so correctness
//! under concurrent access does not depend on any in-process lock held by
//! the caller.
//!
//! - [`InventoryStore`] is the seam over the backing store.
//! - [`InventoryLedger`] layers batch semantics (rollback on partial
//!   reservation failure), catalog mirroring and metrics on top.

pub mod catalog;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use catalog::{InMemoryProductCatalog, ProductCatalog, ProductSnapshot};
pub use error::{CatalogError, InventoryError, Result};
pub use ledger::InventoryLedger;
pub use memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use record::{
    DEFAULT_LOW_STOCK_THRESHOLD, InventoryRecord, LowStockItem, StockKey, StockLine, StockSettings,
};
pub use store::InventoryStore;
