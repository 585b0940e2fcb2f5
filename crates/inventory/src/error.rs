use common::{ProductId, VariantId};
use thiserror::Error;

use crate::StockKey;

/// Errors raised by inventory ledger operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The request would drive `available` below zero.
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

    /// No inventory record exists for the key (or it belongs to another tenant).
    #[error("Inventory record not found: {0}")]
    NotFound(StockKey),

    /// Malformed input rejected before touching the store.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn variant_suffix(variant_id: &Option<VariantId>) -> String {
    match variant_id {
        Some(variant) => format!(" (variant {variant})"),
        None => String::new(),
    }
}

impl InventoryError {
    pub(crate) fn insufficient(key: &StockKey, requested: u64, available: u32) -> Self {
        InventoryError::InsufficientStock {
            product_id: key.product_id.clone(),
            variant_id: key.variant_id.clone(),
            requested,
            available,
        }
    }
}

/// Failure talking to the product catalog collaborator.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, InventoryError>;
