//! Status enums carried by an order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string did not name a known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Lifecycle status of an order.
    ///
    /// ```text
    /// pending ─► confirmed ─► processing ─► ready_for_pickup ─► shipped ─► delivered ─► refunded
    ///    │           │             │                │               │
    ///    └───────────┴─────────────┴────────────────┴───────────────┴──► cancelled
    /// ```
    OrderStatus ("order status") {
        Pending => "pending",
        Confirmed => "confirmed",
        Processing => "processing",
        ReadyForPickup => "ready_for_pickup",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

impl OrderStatus {
    /// Terminal in the forward table. `delivered → refunded` is the one
    /// modelled exception and is listed explicitly in the transition table.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

string_enum! {
    /// Payment state as reported by the payment gateway adapter or staff.
    PaymentStatus ("payment status") {
        Pending => "pending",
        Paid => "paid",
        Failed => "failed",
        Refunded => "refunded",
        PartiallyRefunded => "partially_refunded",
    }
}

string_enum! {
    PaymentMethod ("payment method") {
        CashOnDelivery => "cash_on_delivery",
        BankTransfer => "bank_transfer",
        Card => "card",
        Wallet => "wallet",
    }
}

string_enum! {
    /// Channel the order came in through.
    OrderSource ("order source") {
        Storefront => "storefront",
        Admin => "admin",
        Pos => "pos",
        Api => "api",
    }
}

string_enum! {
    /// What the ledger currently holds on behalf of an order.
    ///
    /// An order is written as `pending` before its stock is reserved and
    /// flipped to `reserved` afterwards, so a checkout interrupted between
    /// the two writes is visible and can be swept.
    StockState ("stock state") {
        /// Reservation not yet confirmed.
        Pending => "pending",
        Reserved => "reserved",
        Released => "released",
        Committed => "committed",
        /// The order never got (or gave up) its reservation.
        Unallocated => "unallocated",
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl Default for OrderSource {
    fn default() -> Self {
        OrderSource::Storefront
    }
}
