pub mod admin;
pub mod catalog;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
