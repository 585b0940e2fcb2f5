//! Order service: the only place where order writes and ledger calls meet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use common::{ActorId, OrderId, TenantId};
use inventory::{InventoryError, InventoryLedger, InventoryStore, ProductCatalog, StockKey};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{DomainError, Result, StoreError};
use crate::order::{
    FulfillmentUpdate, NewOrder, NewOrderLine, Order, OrderItem, PaymentUpdate, StatusChange,
};
use crate::query::{OrderPage, OrderQuery};
use crate::status::{OrderStatus, StockState};
use crate::store::OrderStore;
use crate::transition::LedgerEffect;
use crate::OrderError;

/// Cancel reason recorded when checkout cannot reserve stock.
pub const INSUFFICIENT_STOCK_REASON: &str = "insufficient stock";

/// Cancel reason recorded by [`OrderService::sweep_stale_checkouts`].
pub const ABANDONED_CHECKOUT_REASON: &str = "checkout abandoned";

const CAS_ATTEMPTS: usize = 3;
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Result of [`OrderService::update`].
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub order: Order,
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// The ledger call that was actually made.
    pub ledger_effect: LedgerEffect,
}

/// Mismatch between a stock record's `reserved` count and the orders that
/// claim it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationDrift {
    pub key: StockKey,
    pub ledger_reserved: u32,
    /// Units held by orders whose stock state is `reserved`.
    pub claimed: u64,
    /// Units of orders still being checked out.
    pub in_flight: u64,
}

impl ReservationDrift {
    /// Reserved units no order accounts for.
    pub fn leaked(&self) -> u64 {
        u64::from(self.ledger_reserved).saturating_sub(self.claimed + self.in_flight)
    }

    /// Units orders believe they hold that the ledger does not.
    pub fn missing(&self) -> u64 {
        self.claimed.saturating_sub(u64::from(self.ledger_reserved))
    }
}

/// Drives the order lifecycle and the inventory ledger together.
///
/// Every order write is a compare-and-swap on the order's version, and a
/// ledger call is only made by the writer that won. Two concurrent cancels
/// of the same order therefore release its stock once.
pub struct OrderService<O, S, C> {
    orders: O,
    ledger: Arc<InventoryLedger<S, C>>,
}

impl<O, S, C> OrderService<O, S, C>
where
    O: OrderStore,
    S: InventoryStore,
    C: ProductCatalog,
{
    pub fn new(orders: O, ledger: Arc<InventoryLedger<S, C>>) -> Self {
        Self { orders, ledger }
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn ledger(&self) -> &InventoryLedger<S, C> {
        &self.ledger
    }

    /// Places an order and reserves its stock.
    ///
    /// The order is written with stock state `pending` before the ledger is
    /// touched and flipped to `reserved` afterwards. If stock is short the
    /// order is kept, cancelled with reason "insufficient stock", and the
    /// call fails with [`DomainError::InsufficientStock`].
    #[tracing::instrument(skip(self, request), fields(%tenant_id, lines = request.lines.len()))]
    pub async fn create_order(&self, tenant_id: TenantId, request: NewOrder) -> Result<Order> {
        if request.lines.is_empty() {
            return Err(DomainError::Validation("order has no items".to_string()));
        }
        let items = self.snapshot_items(tenant_id, &request.lines).await?;
        let order = self.insert_new(tenant_id, &request, items).await?;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id(), order_number = order.order_number(), "order placed");

        match self.ledger.reserve(tenant_id, &order.stock_lines()).await {
            Ok(()) => self.finish_reservation(order).await,
            Err(e @ InventoryError::InsufficientStock { .. }) => {
                let order_id = order.id();
                if let Err(store_err) = self
                    .abandon(order, INSUFFICIENT_STOCK_REASON, Utc::now())
                    .await
                {
                    tracing::warn!(%order_id, error = %store_err, "could not cancel unreservable order");
                }
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id(),
                    error = %e,
                    "reservation failed; order left stock-pending for the sweeper"
                );
                Err(e.into())
            }
        }
    }

    /// Applies a status transition and the ledger effect it implies.
    #[tracing::instrument(skip(self, change), fields(%tenant_id, %order_id, to = %change.to))]
    pub async fn update(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        change: StatusChange,
    ) -> Result<TransitionOutcome> {
        let started = Instant::now();
        let mut order = self.load(tenant_id, order_id).await?;
        let expected = order.version();
        let applied = order.transition(change, Utc::now())?;

        // Losing this race means another writer already moved the order,
        // so the ledger is left alone.
        let version = self.orders.update(&order, expected).await?;
        order.set_version(version);

        let lines = order.stock_lines();
        let ledger_result = match applied.ledger {
            LedgerEffect::Release => self.ledger.release(tenant_id, &lines).await,
            LedgerEffect::Commit => self.ledger.confirm(tenant_id, &lines).await,
            LedgerEffect::None => Ok(()),
        };
        if let Err(e) = ledger_result {
            tracing::error!(
                error = %e,
                effect = ?applied.ledger,
                "status change persisted but ledger update failed"
            );
            return Err(e.into());
        }

        metrics::counter!("order_transitions_total", "to" => applied.to.as_str()).increment(1);
        metrics::histogram!("order_transition_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(from = %applied.from, effect = ?applied.ledger, "order status changed");

        Ok(TransitionOutcome {
            order,
            from: applied.from,
            to: applied.to,
            ledger_effect: applied.ledger,
        })
    }

    #[tracing::instrument(skip(self, update), fields(%tenant_id, %order_id, status = %update.status))]
    pub async fn update_payment_status(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        update: PaymentUpdate,
    ) -> Result<Order> {
        self.modify(tenant_id, order_id, |order, now| {
            order.record_payment(update.clone(), now)
        })
        .await
    }

    #[tracing::instrument(skip(self, update), fields(%tenant_id, %order_id))]
    pub async fn update_fulfillment(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        update: FulfillmentUpdate,
    ) -> Result<Order> {
        self.modify(tenant_id, order_id, |order, now| {
            order.update_fulfillment(update.clone(), now)
        })
        .await
    }

    #[tracing::instrument(skip(self, text), fields(%tenant_id, %order_id))]
    pub async fn add_note(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        text: &str,
        actor: Option<ActorId>,
    ) -> Result<Order> {
        self.modify(tenant_id, order_id, |order, now| order.add_note(text, actor, now))
            .await
    }

    pub async fn get_by_id(&self, tenant_id: TenantId, order_id: OrderId) -> Result<Order> {
        self.load(tenant_id, order_id).await
    }

    pub async fn get_by_number(&self, tenant_id: TenantId, number: &str) -> Result<Order> {
        self.orders
            .get_by_number(tenant_id, number)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Order {number}")))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list(&self, tenant_id: TenantId, query: &OrderQuery) -> Result<OrderPage> {
        query.validate()?;
        Ok(self.orders.list(tenant_id, query).await?)
    }

    /// Cancels orders whose checkout never got past stock state `pending`
    /// within `timeout`, across all tenants.
    ///
    /// The ledger is not touched: whether a crashed checkout reserved
    /// anything is unknown, and releasing stock that was never reserved
    /// would oversell. Leftovers show up in [`Self::reservation_drift`].
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stale_checkouts(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<OrderId>> {
        let cutoff = now.checked_sub_signed(timeout).ok_or_else(|| {
            DomainError::Validation(format!("checkout timeout {timeout} is out of range"))
        })?;
        let stale = self
            .orders
            .find_by_stock_state(None, StockState::Pending, Some(cutoff))
            .await?;

        let mut swept = Vec::new();
        for order in stale {
            let order_id = order.id();
            let tenant_id = order.tenant_id();
            match self.abandon(order, ABANDONED_CHECKOUT_REASON, now).await {
                Ok(Some(_)) => {
                    metrics::counter!("orders_reconciled_total").increment(1);
                    tracing::warn!(%order_id, %tenant_id, "stale checkout cancelled");
                    swept.push(order_id);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%order_id, %tenant_id, error = %e, "could not sweep checkout"),
            }
        }
        Ok(swept)
    }

    /// Compares the ledger's `reserved` counts with what the tenant's orders
    /// claim. Only keys that disagree are returned.
    #[tracing::instrument(skip(self))]
    pub async fn reservation_drift(&self, tenant_id: TenantId) -> Result<Vec<ReservationDrift>> {
        let mut claims: HashMap<StockKey, (u64, u64)> = HashMap::new();
        for (state, in_flight) in [(StockState::Reserved, false), (StockState::Pending, true)] {
            let orders = self
                .orders
                .find_by_stock_state(Some(tenant_id), state, None)
                .await?;
            for order in orders {
                for line in order.stock_lines() {
                    let entry = claims.entry(line.key(tenant_id)).or_default();
                    let quantity = u64::from(line.quantity);
                    if in_flight {
                        entry.1 += quantity;
                    } else {
                        entry.0 += quantity;
                    }
                }
            }
        }

        let mut drift = Vec::new();
        for record in self.ledger.records(tenant_id).await? {
            let (claimed, in_flight) = claims.remove(&record.key).unwrap_or_default();
            drift.push(ReservationDrift {
                key: record.key,
                ledger_reserved: record.reserved,
                claimed,
                in_flight,
            });
        }
        // Claims against keys the ledger has never seen.
        drift.extend(
            claims
                .into_iter()
                .map(|(key, (claimed, in_flight))| ReservationDrift {
                    key,
                    ledger_reserved: 0,
                    claimed,
                    in_flight,
                }),
        );

        drift.retain(|d| d.leaked() > 0 || d.missing() > 0);
        drift.sort_by(|a, b| {
            a.key
                .product_id
                .cmp(&b.key.product_id)
                .then_with(|| a.key.variant_id.cmp(&b.key.variant_id))
        });
        if !drift.is_empty() {
            tracing::warn!(keys = drift.len(), "reservation drift detected");
        }
        Ok(drift)
    }

    async fn load(&self, tenant_id: TenantId, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(tenant_id, order_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Order {order_id}")))
    }

    async fn snapshot_items(
        &self,
        tenant_id: TenantId,
        lines: &[NewOrderLine],
    ) -> Result<Vec<OrderItem>> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let snapshot = self
                .ledger
                .catalog()
                .snapshot(tenant_id, &line.product_id, line.variant_id.as_ref())
                .await?
                .ok_or_else(|| {
                    DomainError::Validation(format!("unknown product {}", line.product_id))
                })?;
            items.push(OrderItem::new(
                line.product_id.clone(),
                line.variant_id.clone(),
                snapshot,
                line.quantity,
            )?);
        }
        Ok(items)
    }

    async fn insert_new(
        &self,
        tenant_id: TenantId,
        request: &NewOrder,
        items: Vec<OrderItem>,
    ) -> Result<Order> {
        if let Some(number) = &request.order_number {
            let order = Order::place(tenant_id, number.clone(), request, items, Utc::now())?;
            self.orders.insert(&order).await?;
            return Ok(order);
        }

        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let now = Utc::now();
            let order = Order::place(
                tenant_id,
                generate_order_number(now),
                request,
                items.clone(),
                now,
            )?;
            match self.orders.insert(&order).await {
                Ok(()) => return Ok(order),
                Err(StoreError::DuplicateOrderNumber(number)) => {
                    tracing::debug!(%number, "generated order number taken; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DomainError::Conflict(
            "could not allocate a unique order number".to_string(),
        ))
    }

    /// Flips a freshly reserved order to stock state `reserved`. If the
    /// order was cancelled or swept while the reservation was in flight,
    /// the stock is handed back instead.
    async fn finish_reservation(&self, mut order: Order) -> Result<Order> {
        let lines = order.stock_lines();
        for _ in 0..CAS_ATTEMPTS {
            let expected = order.version();
            let now = Utc::now();
            let keep = order.stock_state() == StockState::Pending
                && order.status() != OrderStatus::Cancelled;
            if keep {
                order.mark_reserved(now);
            } else if order.stock_state() == StockState::Pending {
                order.mark_released(now);
            }

            match self.orders.update(&order, expected).await {
                Ok(version) => {
                    order.set_version(version);
                    if !keep {
                        self.ledger.release(order.tenant_id(), &lines).await?;
                        tracing::warn!(order_id = %order.id(), "order cancelled during checkout; stock returned");
                    }
                    return Ok(order);
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    order = self.load(order.tenant_id(), order.id()).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(order_id = %order.id(), "could not record reservation; stock left reserved");
        Err(DomainError::Conflict(format!(
            "order {} kept changing during checkout",
            order.id()
        )))
    }

    /// Cancels an order that will never hold stock. Returns `None` if the
    /// order left stock state `pending` in the meantime.
    async fn abandon(
        &self,
        mut order: Order,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        for _ in 0..CAS_ATTEMPTS {
            if order.stock_state() != StockState::Pending {
                return Ok(None);
            }
            let expected = order.version();
            order.abandon_reservation(reason, now);
            match self.orders.update(&order, expected).await {
                Ok(version) => {
                    order.set_version(version);
                    return Ok(Some(order));
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    order = self.load(order.tenant_id(), order.id()).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DomainError::Conflict(format!(
            "order {} kept changing while being cancelled",
            order.id()
        )))
    }

    /// Load, mutate, compare-and-swap; retried on a lost race since none of
    /// these mutations touch the ledger.
    async fn modify<F>(&self, tenant_id: TenantId, order_id: OrderId, mutate: F) -> Result<Order>
    where
        F: Fn(&mut Order, DateTime<Utc>) -> std::result::Result<(), OrderError>,
    {
        for _ in 0..CAS_ATTEMPTS {
            let mut order = self.load(tenant_id, order_id).await?;
            let expected = order.version();
            mutate(&mut order, Utc::now())?;
            match self.orders.update(&order, expected).await {
                Ok(version) => {
                    order.set_version(version);
                    return Ok(order);
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    tracing::debug!(%order_id, "order changed concurrently; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DomainError::Conflict(format!(
            "order {order_id} kept changing; try again"
        )))
    }
}

/// `ORD-YYYYMMDD-XXXXXX` with six random uppercase hex digits.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("ORD-{}-{suffix}", now.format("%Y%m%d"))
}
