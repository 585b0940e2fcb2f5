//! Error types for the order lifecycle.

use common::{ProductId, VariantId};
use inventory::{CatalogError, InventoryError};
use thiserror::Error;

use crate::status::OrderStatus;

/// Errors raised by the order aggregate itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    /// The transition table has no edge between the two statuses.
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Only cancellation is allowed until checkout has reserved stock.
    #[error("Cannot move order to {to} while checkout is still reserving stock")]
    CheckoutInProgress { to: OrderStatus },

    /// Input rejected before any state changed.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised by an order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another order in the tenant already uses this number.
    #[error("Order number already exists: {0}")]
    DuplicateOrderNumber(String),

    /// The stored version moved on since the order was loaded.
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the order service.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate order number or a lost optimistic-concurrency race.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(
        "Insufficient stock for product {product_id}{}: requested {requested}, available {available}",
        variant_suffix(.variant_id)
    )]
    InsufficientStock {
        product_id: ProductId,
        variant_id: Option<VariantId>,
        requested: u64,
        available: u32,
    },

    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Inventory error: {0}")]
    Inventory(InventoryError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

fn variant_suffix(variant_id: &Option<VariantId>) -> String {
    variant_id
        .as_ref()
        .map(|v| format!(" (variant {v})"))
        .unwrap_or_default()
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InvalidTransition { from, to } => DomainError::InvalidTransition { from, to },
            e @ OrderError::CheckoutInProgress { .. } => DomainError::Conflict(e.to_string()),
            OrderError::Validation(msg) => DomainError::Validation(msg),
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateOrderNumber(number) => {
                DomainError::Conflict(format!("order number {number} already exists"))
            }
            e @ StoreError::ConcurrencyConflict { .. } => DomainError::Conflict(e.to_string()),
            StoreError::NotFound(what) => DomainError::NotFound(what),
            other => DomainError::Store(other),
        }
    }
}

impl From<InventoryError> for DomainError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::InsufficientStock {
                product_id,
                variant_id,
                requested,
                available,
            } => DomainError::InsufficientStock {
                product_id,
                variant_id,
                requested,
                available,
            },
            InventoryError::NotFound(key) => DomainError::NotFound(format!("Inventory record {key}")),
            InventoryError::Validation(msg) => DomainError::Validation(msg),
            other => DomainError::Inventory(other),
        }
    }
}

/// Result type for order service operations.
pub type Result<T> = std::result::Result<T, DomainError>;
