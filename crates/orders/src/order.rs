//! Order aggregate.
//!
//! An [`Order`] is only mutated through the methods in this module. Each one
//! validates first and then applies its change in full, so a rejected call
//! leaves the order untouched.

use chrono::{DateTime, Utc};
use common::{ActorId, CustomerId, Money, OrderId, ProductId, TenantId, VariantId, Version};
use inventory::{ProductSnapshot, StockLine};
use serde::{Deserialize, Serialize};

use crate::OrderError;
use crate::status::{
    OrderSource, OrderStatus, ParseStatusError, PaymentMethod, PaymentStatus, StockState,
};
use crate::transition::{LedgerEffect, find_rule};

pub const MAX_ORDER_NUMBER_LEN: usize = 64;
pub const MAX_NOTE_LEN: usize = 2000;

/// A purchased line, snapshotted from the catalog at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub name: String,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderItem {
    pub fn new(
        product_id: ProductId,
        variant_id: Option<VariantId>,
        snapshot: ProductSnapshot,
        quantity: u32,
    ) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::Validation(format!(
                "quantity for {product_id} must be greater than 0"
            )));
        }
        if snapshot.unit_price.is_negative() {
            return Err(OrderError::Validation(format!(
                "price for {product_id} is negative"
            )));
        }
        let line_total = snapshot
            .unit_price
            .checked_mul(quantity)
            .ok_or_else(|| OrderError::Validation(format!("line total for {product_id} overflows")))?;

        Ok(Self {
            product_id,
            variant_id,
            name: snapshot.name,
            image_url: snapshot.image_url,
            quantity,
            unit_price: snapshot.unit_price,
            line_total,
        })
    }
}

/// Monetary summary. `total = subtotal - discount + shipping + tax`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
}

impl Totals {
    pub fn compute(
        items: &[OrderItem],
        discount: Money,
        shipping: Money,
        tax: Money,
    ) -> Result<Self, OrderError> {
        for (label, amount) in [("discount", discount), ("shipping", shipping), ("tax", tax)] {
            if amount.is_negative() {
                return Err(OrderError::Validation(format!("{label} cannot be negative")));
            }
        }

        let overflow = || OrderError::Validation("order total overflows".to_string());
        let subtotal = items
            .iter()
            .try_fold(Money::ZERO, |acc, item| acc.checked_add(item.line_total))
            .ok_or_else(overflow)?;
        if discount > subtotal {
            return Err(OrderError::Validation(format!(
                "discount {discount} exceeds subtotal {subtotal}"
            )));
        }
        let total = subtotal
            .checked_sub(discount)
            .and_then(|t| t.checked_add(shipping))
            .and_then(|t| t.checked_add(tax))
            .ok_or_else(overflow)?;

        Ok(Self {
            subtotal,
            discount,
            shipping,
            tax,
            total,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingContact {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub transaction_id: Option<String>,
    /// Set by the first `paid` update and never overwritten.
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub provider: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// What a history entry records.
///
/// Serialized as a single string: the status name for lifecycle changes,
/// `payment_<status>` for payment updates, `fulfillment` or `note`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum HistoryEvent {
    Status(OrderStatus),
    Payment(PaymentStatus),
    Fulfillment,
    Note,
}

const PAYMENT_PREFIX: &str = "payment_";

impl From<HistoryEvent> for String {
    fn from(event: HistoryEvent) -> Self {
        match event {
            HistoryEvent::Status(status) => status.as_str().to_string(),
            HistoryEvent::Payment(status) => format!("{PAYMENT_PREFIX}{status}"),
            HistoryEvent::Fulfillment => "fulfillment".to_string(),
            HistoryEvent::Note => "note".to_string(),
        }
    }
}

impl TryFrom<String> for HistoryEvent {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "fulfillment" => Ok(HistoryEvent::Fulfillment),
            "note" => Ok(HistoryEvent::Note),
            other => match other.strip_prefix(PAYMENT_PREFIX) {
                Some(payment) => payment.parse().map(HistoryEvent::Payment),
                None => other.parse().map(HistoryEvent::Status),
            },
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub event: HistoryEvent,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// A requested line at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

/// Checkout request. Names and prices come from the catalog, not from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Generated as `ORD-YYYYMMDD-XXXXXX` when absent.
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub lines: Vec<NewOrderLine>,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub shipping: Money,
    #[serde(default)]
    pub tax: Money,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub source: OrderSource,
    #[serde(default)]
    pub contact: ShippingContact,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(skip)]
    pub actor: Option<ActorId>,
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(rename = "status")]
    pub to: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(skip)]
    pub actor: Option<ActorId>,
}

impl StatusChange {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            to: status,
            note: None,
            cancel_reason: None,
            actor: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_cancel_reason(mut self, reason: impl Into<String>) -> Self {
        self.cancel_reason = Some(reason.into());
        self
    }

    pub fn by(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(skip)]
    pub actor: Option<ActorId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentUpdate {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(skip)]
    pub actor: Option<ActorId>,
}

/// Result of a successful [`Order::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// What the caller must now do against the ledger. This can be weaker
    /// than the table's effect when the order holds no reservation.
    pub ledger: LedgerEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    tenant_id: TenantId,
    order_number: String,
    customer_id: Option<CustomerId>,
    items: Vec<OrderItem>,
    totals: Totals,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    payment: PaymentDetails,
    fulfillment: Fulfillment,
    contact: ShippingContact,
    source: OrderSource,
    cancel_reason: Option<String>,
    history: Vec<StatusHistoryEntry>,
    stock_state: StockState,
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new `pending` order whose stock is not yet reserved.
    pub fn place(
        tenant_id: TenantId,
        order_number: String,
        request: &NewOrder,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        validate_order_number(&order_number)?;
        if items.is_empty() {
            return Err(OrderError::Validation("order has no items".to_string()));
        }
        let totals = Totals::compute(&items, request.discount, request.shipping, request.tax)?;
        let note = clean_text(request.note.as_deref());

        Ok(Self {
            id: OrderId::new(),
            tenant_id,
            order_number,
            customer_id: request.customer_id,
            items,
            totals,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            payment: PaymentDetails::default(),
            fulfillment: Fulfillment::default(),
            contact: request.contact.clone(),
            source: request.source,
            cancel_reason: None,
            history: vec![StatusHistoryEntry {
                event: HistoryEvent::Status(OrderStatus::Pending),
                at: now,
                note,
                actor: request.actor,
                cancel_reason: None,
            }],
            stock_state: StockState::Pending,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment(&self) -> &PaymentDetails {
        &self.payment
    }

    pub fn fulfillment(&self) -> &Fulfillment {
        &self.fulfillment
    }

    pub fn contact(&self) -> &ShippingContact {
        &self.contact
    }

    pub fn source(&self) -> OrderSource {
        self.source
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.history
    }

    pub fn stock_state(&self) -> StockState {
        self.stock_state
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The ledger lines this order holds or would hold.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items
            .iter()
            .map(|item| StockLine::new(item.product_id.clone(), item.variant_id.clone(), item.quantity))
            .collect()
    }

    /// Case-insensitive substring match on order number and contact fields.
    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        let contains = |haystack: &str| haystack.to_lowercase().contains(needle);
        contains(&self.order_number)
            || contains(&self.contact.name)
            || self.contact.email.as_deref().is_some_and(contains)
            || self.contact.phone.as_deref().is_some_and(contains)
    }

    /// Moves the order along one edge of the transition table.
    pub fn transition(
        &mut self,
        change: StatusChange,
        now: DateTime<Utc>,
    ) -> Result<AppliedTransition, OrderError> {
        let from = self.status;
        let rule = find_rule(from, change.to)?;
        if self.stock_state == StockState::Pending && change.to != OrderStatus::Cancelled {
            return Err(OrderError::CheckoutInProgress { to: change.to });
        }

        let ledger = match (rule.ledger, self.stock_state) {
            (LedgerEffect::Release, StockState::Reserved) => {
                self.stock_state = StockState::Released;
                LedgerEffect::Release
            }
            (LedgerEffect::Commit, StockState::Reserved) => {
                self.stock_state = StockState::Committed;
                LedgerEffect::Commit
            }
            _ => LedgerEffect::None,
        };

        let cancel_reason = match change.to {
            OrderStatus::Cancelled => clean_text(change.cancel_reason.as_deref()),
            _ => None,
        };
        match change.to {
            OrderStatus::Shipped => {
                self.fulfillment.shipped_at.get_or_insert(now);
            }
            OrderStatus::Delivered => {
                self.fulfillment.delivered_at.get_or_insert(now);
            }
            OrderStatus::Cancelled => self.cancel_reason = cancel_reason.clone(),
            _ => {}
        }

        self.status = change.to;
        self.push_history(
            HistoryEvent::Status(change.to),
            clean_text(change.note.as_deref()),
            change.actor,
            cancel_reason,
            now,
        );

        Ok(AppliedTransition {
            from,
            to: change.to,
            ledger,
        })
    }

    /// Records a payment status. `paid_at` and `refunded_at` are stamped by
    /// the first update that reaches them and kept afterwards.
    pub fn record_payment(
        &mut self,
        update: PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let transaction_id = clean_text(update.transaction_id.as_deref());
        if update.transaction_id.is_some() && transaction_id.is_none() {
            return Err(OrderError::Validation(
                "transaction id cannot be blank".to_string(),
            ));
        }

        self.payment_status = update.status;
        if transaction_id.is_some() {
            self.payment.transaction_id = transaction_id;
        }
        match update.status {
            PaymentStatus::Paid => {
                self.payment.paid_at.get_or_insert(now);
            }
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded => {
                self.payment.refunded_at.get_or_insert(now);
            }
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }

        self.push_history(
            HistoryEvent::Payment(update.status),
            clean_text(update.note.as_deref()),
            update.actor,
            None,
            now,
        );
        Ok(())
    }

    pub fn update_fulfillment(
        &mut self,
        update: FulfillmentUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let provider = clean_text(update.provider.as_deref());
        let tracking_number = clean_text(update.tracking_number.as_deref());
        let tracking_url = clean_text(update.tracking_url.as_deref());
        if provider.is_none() && tracking_number.is_none() && tracking_url.is_none() {
            return Err(OrderError::Validation(
                "fulfillment update has no fields".to_string(),
            ));
        }
        if matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return Err(OrderError::Validation(format!(
                "cannot update fulfillment of a {} order",
                self.status
            )));
        }

        let note = tracking_number
            .as_ref()
            .map(|number| format!("tracking number {number}"));
        self.updated_at = now;
        if provider.is_some() {
            self.fulfillment.provider = provider;
        }
        if tracking_number.is_some() {
            self.fulfillment.tracking_number = tracking_number;
        }
        if tracking_url.is_some() {
            self.fulfillment.tracking_url = tracking_url;
        }

        if note.is_some() {
            self.push_history(HistoryEvent::Fulfillment, note, update.actor, None, now);
        }
        Ok(())
    }

    pub fn add_note(
        &mut self,
        text: &str,
        actor: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let Some(note) = clean_text(Some(text)) else {
            return Err(OrderError::Validation("note cannot be empty".to_string()));
        };
        if note.chars().count() > MAX_NOTE_LEN {
            return Err(OrderError::Validation(format!(
                "note exceeds {MAX_NOTE_LEN} characters"
            )));
        }
        self.push_history(HistoryEvent::Note, Some(note), actor, None, now);
        Ok(())
    }

    /// The reservation for this order succeeded.
    pub(crate) fn mark_reserved(&mut self, now: DateTime<Utc>) {
        self.stock_state = StockState::Reserved;
        self.updated_at = now;
    }

    /// Reservation succeeded but the order was cancelled meanwhile; the
    /// caller has handed the stock back.
    pub(crate) fn mark_released(&mut self, now: DateTime<Utc>) {
        self.stock_state = StockState::Released;
        self.updated_at = now;
    }

    /// The order will never hold stock. Cancels it if it is still open.
    pub(crate) fn abandon_reservation(&mut self, reason: &str, now: DateTime<Utc>) {
        if find_rule(self.status, OrderStatus::Cancelled).is_ok() {
            self.status = OrderStatus::Cancelled;
            self.cancel_reason = Some(reason.to_string());
            self.push_history(
                HistoryEvent::Status(OrderStatus::Cancelled),
                None,
                None,
                Some(reason.to_string()),
                now,
            );
        }
        self.stock_state = StockState::Unallocated;
        self.updated_at = now;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn push_history(
        &mut self,
        event: HistoryEvent,
        note: Option<String>,
        actor: Option<ActorId>,
        cancel_reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.history.push(StatusHistoryEntry {
            event,
            at: now,
            note,
            actor,
            cancel_reason,
        });
        self.updated_at = now;
    }
}

fn validate_order_number(number: &str) -> Result<(), OrderError> {
    if number.trim().is_empty() {
        return Err(OrderError::Validation(
            "order number cannot be empty".to_string(),
        ));
    }
    if number.len() > MAX_ORDER_NUMBER_LEN || number.trim() != number {
        return Err(OrderError::Validation(format!(
            "invalid order number: {number}"
        )));
    }
    Ok(())
}

fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    fn item(product: &str, cents: i64, quantity: u32) -> OrderItem {
        OrderItem::new(
            ProductId::new(product),
            None,
            ProductSnapshot::new(product, Money::from_cents(cents)),
            quantity,
        )
        .unwrap()
    }

    fn request() -> NewOrder {
        NewOrder {
            order_number: None,
            customer_id: None,
            lines: Vec::new(),
            discount: Money::from_cents(500),
            shipping: Money::from_cents(300),
            tax: Money::from_cents(120),
            payment_method: PaymentMethod::CashOnDelivery,
            source: OrderSource::Storefront,
            contact: ShippingContact {
                name: "Ada Lovelace".to_string(),
                email: Some("ada@example.com".to_string()),
                phone: Some("+44 20 7946 0000".to_string()),
                ..Default::default()
            },
            note: Some("  leave at the door ".to_string()),
            actor: None,
        }
    }

    fn placed() -> Order {
        Order::place(
            TenantId::new(),
            "ORD-20251009-ABC123".to_string(),
            &request(),
            vec![item("mug", 1250, 2), item("tee", 2000, 1)],
            at(0),
        )
        .unwrap()
    }

    fn reserved() -> Order {
        let mut order = placed();
        order.mark_reserved(at(0));
        order
    }

    #[test]
    fn test_place_computes_totals() {
        let order = placed();
        let totals = order.totals();
        assert_eq!(totals.subtotal, Money::from_cents(4500));
        assert_eq!(totals.total, Money::from_cents(4500 - 500 + 300 + 120));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.stock_state(), StockState::Pending);
        assert_eq!(order.version(), Version::first());
        assert_eq!(order.history().len(), 1);
        assert_eq!(order.history()[0].note.as_deref(), Some("leave at the door"));
    }

    #[test]
    fn test_place_rejects_discount_above_subtotal() {
        let mut req = request();
        req.discount = Money::from_cents(10_000);
        let err = Order::place(
            TenantId::new(),
            "ORD-1".to_string(),
            &req,
            vec![item("mug", 1250, 1)],
            at(0),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn test_place_rejects_empty_orders_and_bad_numbers() {
        assert!(Order::place(TenantId::new(), "ORD-1".into(), &request(), vec![], at(0)).is_err());
        assert!(
            Order::place(TenantId::new(), "  ".into(), &request(), vec![item("mug", 1, 1)], at(0))
                .is_err()
        );
    }

    #[test]
    fn test_zero_quantity_item_is_rejected() {
        let err = OrderItem::new(
            ProductId::new("mug"),
            None,
            ProductSnapshot::new("Mug", Money::from_cents(100)),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn test_cancel_reserved_order_releases() {
        let mut order = reserved();
        let applied = order
            .transition(
                StatusChange::to(OrderStatus::Cancelled).with_cancel_reason("customer request"),
                at(5),
            )
            .unwrap();

        assert_eq!(applied.from, OrderStatus::Pending);
        assert_eq!(applied.ledger, LedgerEffect::Release);
        assert_eq!(order.stock_state(), StockState::Released);
        assert_eq!(order.cancel_reason(), Some("customer request"));
        let last = order.history().last().unwrap();
        assert_eq!(last.event, HistoryEvent::Status(OrderStatus::Cancelled));
        assert_eq!(last.cancel_reason.as_deref(), Some("customer request"));
        assert_eq!(order.updated_at(), at(5));
    }

    #[test]
    fn test_cancel_without_reservation_has_no_ledger_effect() {
        let mut order = placed();
        let applied = order
            .transition(StatusChange::to(OrderStatus::Cancelled), at(1))
            .unwrap();
        assert_eq!(applied.ledger, LedgerEffect::None);
        assert_eq!(order.stock_state(), StockState::Pending);
    }

    #[test]
    fn test_only_cancel_is_allowed_before_stock_is_reserved() {
        let mut order = placed();
        let before = order.clone();
        let err = order
            .transition(StatusChange::to(OrderStatus::Confirmed), at(1))
            .unwrap_err();
        assert_eq!(
            err,
            OrderError::CheckoutInProgress {
                to: OrderStatus::Confirmed
            }
        );
        assert_eq!(order, before);

        order
            .transition(StatusChange::to(OrderStatus::Cancelled), at(2))
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_full_lifecycle_commits_on_delivery() {
        let mut order = reserved();
        for (minute, status) in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::ReadyForPickup,
            OrderStatus::Shipped,
        ]
        .into_iter()
        .enumerate()
        {
            let applied = order
                .transition(StatusChange::to(status), at(minute as i64 + 1))
                .unwrap();
            assert_eq!(applied.ledger, LedgerEffect::None);
        }
        assert_eq!(order.fulfillment().shipped_at, Some(at(4)));

        let applied = order
            .transition(StatusChange::to(OrderStatus::Delivered), at(10))
            .unwrap();
        assert_eq!(applied.ledger, LedgerEffect::Commit);
        assert_eq!(order.stock_state(), StockState::Committed);
        assert_eq!(order.fulfillment().delivered_at, Some(at(10)));

        let applied = order
            .transition(StatusChange::to(OrderStatus::Refunded), at(20))
            .unwrap();
        assert_eq!(applied.ledger, LedgerEffect::None);
        assert_eq!(order.stock_state(), StockState::Committed);
        assert_eq!(order.history().len(), 7);
    }

    #[test]
    fn test_rejected_transition_leaves_order_untouched() {
        let mut order = reserved();
        let before = order.clone();
        let err = order
            .transition(StatusChange::to(OrderStatus::Delivered), at(3))
            .unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered
            }
        );
        assert_eq!(order, before);
    }

    #[test]
    fn test_paid_at_is_set_once() {
        let mut order = reserved();
        let paid = |tx: &str| PaymentUpdate {
            status: PaymentStatus::Paid,
            transaction_id: Some(tx.to_string()),
            note: None,
            actor: None,
        };
        order.record_payment(paid("tx-1"), at(1)).unwrap();
        order.record_payment(paid("tx-2"), at(9)).unwrap();

        assert_eq!(order.payment().paid_at, Some(at(1)));
        assert_eq!(order.payment().transaction_id.as_deref(), Some("tx-2"));
        let payment_entries = order
            .history()
            .iter()
            .filter(|e| e.event == HistoryEvent::Payment(PaymentStatus::Paid))
            .count();
        assert_eq!(payment_entries, 2);
    }

    #[test]
    fn test_refund_stamps_refunded_at() {
        let mut order = reserved();
        order
            .record_payment(
                PaymentUpdate {
                    status: PaymentStatus::PartiallyRefunded,
                    transaction_id: None,
                    note: Some("damaged mug".into()),
                    actor: None,
                },
                at(2),
            )
            .unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(order.payment().refunded_at, Some(at(2)));
        assert_eq!(order.payment().paid_at, None);
    }

    #[test]
    fn test_fulfillment_update_appends_history() {
        let mut order = reserved();
        order
            .update_fulfillment(
                FulfillmentUpdate {
                    provider: Some("dhl".into()),
                    tracking_number: Some("JD0001".into()),
                    ..Default::default()
                },
                at(3),
            )
            .unwrap();
        assert_eq!(order.fulfillment().tracking_number.as_deref(), Some("JD0001"));
        let last = order.history().last().unwrap();
        assert_eq!(last.event, HistoryEvent::Fulfillment);
        assert_eq!(last.note.as_deref(), Some("tracking number JD0001"));

        assert!(order.update_fulfillment(FulfillmentUpdate::default(), at(4)).is_err());
    }

    #[test]
    fn test_fulfillment_without_tracking_number_adds_no_history() {
        let mut order = reserved();
        let entries = order.history().len();
        order
            .update_fulfillment(
                FulfillmentUpdate {
                    provider: Some("dhl".into()),
                    tracking_url: Some("https://dhl.example/track".into()),
                    ..Default::default()
                },
                at(3),
            )
            .unwrap();

        assert_eq!(order.fulfillment().provider.as_deref(), Some("dhl"));
        assert_eq!(order.history().len(), entries);
        assert_eq!(order.updated_at(), at(3));
    }

    #[test]
    fn test_notes_must_not_be_blank() {
        let mut order = reserved();
        assert!(order.add_note("   ", None, at(1)).is_err());
        order.add_note("called the customer", None, at(1)).unwrap();
        assert_eq!(order.history().last().unwrap().event, HistoryEvent::Note);
    }

    #[test]
    fn test_abandon_reservation_cancels_open_order() {
        let mut order = placed();
        order.abandon_reservation("insufficient stock", at(1));
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.stock_state(), StockState::Unallocated);
        assert_eq!(order.cancel_reason(), Some("insufficient stock"));

        let entries = order.history().len();
        order.abandon_reservation("checkout abandoned", at(2));
        assert_eq!(order.history().len(), entries);
        assert_eq!(order.cancel_reason(), Some("insufficient stock"));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let order = placed();
        assert!(order.matches_search("ada"));
        assert!(order.matches_search("abc123".to_lowercase().as_str()));
        assert!(order.matches_search("7946"));
        assert!(!order.matches_search("grace"));
    }

    #[test]
    fn test_history_event_serialization() {
        let json = serde_json::to_string(&HistoryEvent::Payment(PaymentStatus::Paid)).unwrap();
        assert_eq!(json, "\"payment_paid\"");
        let event: HistoryEvent = serde_json::from_str("\"ready_for_pickup\"").unwrap();
        assert_eq!(event, HistoryEvent::Status(OrderStatus::ReadyForPickup));
        assert!(serde_json::from_str::<HistoryEvent>("\"payment_lost\"").is_err());
    }

    #[test]
    fn test_order_serialization_round_trip() {
        let order = reserved();
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_stock_lines_follow_items() {
        let lines = placed().stock_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], StockLine::new("mug", None, 2));
    }
}
