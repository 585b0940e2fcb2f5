//! Tenant-scoped order listing.

use chrono::{DateTime, Utc};
use common::CustomerId;
use serde::{Deserialize, Serialize};

use crate::OrderError;
use crate::order::Order;
use crate::status::{OrderSource, OrderStatus, PaymentMethod, PaymentStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filters for listing a tenant's orders.
///
/// Every filter is optional and they combine with AND. Results are always
/// sorted newest first. `page` is 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub source: Option<OrderSource>,
    pub customer_id: Option<CustomerId>,

    /// Case-insensitive substring of order number, contact name, email or phone.
    pub search: Option<String>,

    /// Inclusive lower bound on `created_at`.
    pub date_from: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `created_at`.
    pub date_to: Option<DateTime<Utc>>,

    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl OrderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn source(mut self, source: OrderSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    /// Rejects nonsensical paging and date ranges.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.page == Some(0) {
            return Err(OrderError::Validation("page starts at 1".to_string()));
        }
        if self.limit == Some(0) {
            return Err(OrderError::Validation(
                "limit must be greater than 0".to_string(),
            ));
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(OrderError::Validation(
                    "date_from is after date_to".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn page_number(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, capped at [`MAX_PAGE_SIZE`].
    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page_number() - 1) * u64::from(self.page_size())
    }

    /// Lowercased, trimmed search text; `None` when blank.
    pub fn search_needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// In-process evaluation of every filter except paging.
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status() == s)
            && self.payment_status.is_none_or(|s| order.payment_status() == s)
            && self.payment_method.is_none_or(|m| order.payment_method() == m)
            && self.source.is_none_or(|s| order.source() == s)
            && self
                .customer_id
                .is_none_or(|c| order.customer_id() == Some(c))
            && self.date_from.is_none_or(|from| order.created_at() >= from)
            && self.date_to.is_none_or(|to| order.created_at() <= to)
            && self
                .search_needle()
                .is_none_or(|needle| order.matches_search(&needle))
    }
}

/// One page of results plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl OrderPage {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.limit.max(1)))
    }
}
