//! Order lifecycle for the order-fulfillment core.
//!
//! An [`Order`] moves through the statuses in [`transition::TRANSITIONS`];
//! the [`OrderService`] persists each move with a compare-and-swap on the
//! order version and then applies the implied [`LedgerEffect`] to the
//! inventory ledger. Payment and fulfillment are tracked alongside the
//! status, and every change lands in the order's history.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod query;
pub mod service;
pub mod status;
pub mod store;
pub mod transition;

pub use error::{DomainError, OrderError, Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use order::{
    AppliedTransition, Fulfillment, FulfillmentUpdate, HistoryEvent, NewOrder, NewOrderLine, Order,
    OrderItem, PaymentDetails, PaymentUpdate, ShippingContact, StatusChange, StatusHistoryEntry,
    Totals,
};
pub use postgres::PostgresOrderStore;
pub use query::{OrderPage, OrderQuery};
pub use service::{
    ABANDONED_CHECKOUT_REASON, INSUFFICIENT_STOCK_REASON, OrderService, ReservationDrift,
    TransitionOutcome, generate_order_number,
};
pub use status::{
    OrderSource, OrderStatus, ParseStatusError, PaymentMethod, PaymentStatus, StockState,
};
pub use store::{OrderStore, StoreResult};
pub use transition::{LedgerEffect, TransitionRule};
