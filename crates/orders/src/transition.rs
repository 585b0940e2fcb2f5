//! Declarative transition table for [`OrderStatus`].

use serde::{Deserialize, Serialize};

use crate::OrderError;
use crate::status::OrderStatus;

/// What a transition asks of the inventory ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEffect {
    None,
    /// Return the order's reserved units to `available`.
    Release,
    /// Consume the order's reserved units for good.
    Commit,
}

/// One permitted edge of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub ledger: LedgerEffect,
}

const fn rule(from: OrderStatus, to: OrderStatus, ledger: LedgerEffect) -> TransitionRule {
    TransitionRule { from, to, ledger }
}

use LedgerEffect::{Commit, None as NoEffect, Release};
use OrderStatus::*;

/// Every permitted edge. Anything not listed is rejected.
pub const TRANSITIONS: &[TransitionRule] = &[
    rule(Pending, Confirmed, NoEffect),
    rule(Confirmed, Processing, NoEffect),
    rule(Processing, ReadyForPickup, NoEffect),
    rule(ReadyForPickup, Shipped, NoEffect),
    rule(Shipped, Delivered, Commit),
    rule(Pending, Cancelled, Release),
    rule(Confirmed, Cancelled, Release),
    rule(Processing, Cancelled, Release),
    rule(ReadyForPickup, Cancelled, Release),
    rule(Shipped, Cancelled, Release),
    // Refunds are a payment concern; the stock has already left.
    rule(Delivered, Refunded, NoEffect),
];

/// Looks up the edge from `from` to `to`.
pub fn find_rule(from: OrderStatus, to: OrderStatus) -> Result<&'static TransitionRule, OrderError> {
    TRANSITIONS
        .iter()
        .find(|r| r.from == from && r.to == to)
        .ok_or(OrderError::InvalidTransition { from, to })
}
