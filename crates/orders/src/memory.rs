use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, TenantId, Version};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::order::Order;
use crate::query::{OrderPage, OrderQuery};
use crate::status::StockState;
use crate::store::{OrderStore, StoreResult};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    numbers: HashMap<(TenantId, String), OrderId>,
}

/// In-memory order store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let number_key = (order.tenant_id(), order.order_number().to_string());
        if state.numbers.contains_key(&number_key) {
            return Err(StoreError::DuplicateOrderNumber(
                order.order_number().to_string(),
            ));
        }
        state.numbers.insert(number_key, order.id());
        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: OrderId) -> StoreResult<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .get(&id)
            .filter(|o| o.tenant_id() == tenant_id)
            .cloned())
    }

    async fn get_by_number(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> StoreResult<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .numbers
            .get(&(tenant_id, number.to_string()))
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn update(&self, order: &Order, expected: Version) -> StoreResult<Version> {
        let mut state = self.state.write().await;
        let stored = state
            .orders
            .get_mut(&order.id())
            .filter(|o| o.tenant_id() == order.tenant_id())
            .ok_or_else(|| StoreError::NotFound(format!("Order {}", order.id())))?;

        if stored.version() != expected {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected.as_i64(),
                actual: stored.version().as_i64(),
            });
        }

        let next = expected.next();
        let mut updated = order.clone();
        updated.set_version(next);
        *stored = updated;
        Ok(next)
    }

    async fn list(&self, tenant_id: TenantId, query: &OrderQuery) -> StoreResult<OrderPage> {
        let state = self.state.read().await;
        let mut matching: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.tenant_id() == tenant_id && query.matches(o))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().as_uuid().cmp(&a.id().as_uuid()))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .cloned()
            .collect();

        Ok(OrderPage {
            items,
            total,
            page: query.page_number(),
            limit: query.page_size(),
        })
    }

    async fn find_by_stock_state(
        &self,
        tenant_id: Option<TenantId>,
        stock_state: StockState,
        created_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Order>> {
        let state = self.state.read().await;
        let mut found: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.stock_state() == stock_state)
            .filter(|o| tenant_id.is_none_or(|t| o.tenant_id() == t))
            .filter(|o| created_before.is_none_or(|cutoff| o.created_at() < cutoff))
            .cloned()
            .collect();
        found.sort_by_key(|o| o.created_at());
        Ok(found)
    }
}
