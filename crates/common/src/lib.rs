//! Shared identifiers and value objects for the order-fulfillment core.
//!
//! Everything here is a plain value type. Tenant scoping is carried
//! explicitly in every identifier-bearing call; nothing in this crate
//! resolves tenancy on its own.

mod ids;
mod money;
mod version;

pub use ids::{ActorId, CustomerId, OrderId, ProductId, TenantId, VariantId};
pub use money::Money;
pub use version::Version;
