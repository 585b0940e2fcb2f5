//! End-to-end order lifecycle tests against the in-memory stores.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{ActorId, CustomerId, Money, ProductId, TenantId, VariantId};
use inventory::{
    InMemoryInventoryStore, InMemoryProductCatalog, InventoryLedger, InventoryRecord,
    ProductSnapshot, StockLine,
};
use orders::{
    ABANDONED_CHECKOUT_REASON, DomainError, FulfillmentUpdate, HistoryEvent,
    INSUFFICIENT_STOCK_REASON, InMemoryOrderStore, LedgerEffect, NewOrder, NewOrderLine, Order,
    OrderQuery, OrderService, OrderSource, OrderStatus, OrderStore, PaymentMethod, PaymentStatus,
    PaymentUpdate, ShippingContact, StatusChange, StockState,
};

type Service = OrderService<InMemoryOrderStore, InMemoryInventoryStore, InMemoryProductCatalog>;

struct Fixture {
    service: Arc<Service>,
    tenant: TenantId,
}

impl Fixture {
    async fn new(stock: &[(&str, u32)]) -> Self {
        let tenant = TenantId::new();
        let catalog = InMemoryProductCatalog::new();
        catalog
            .insert(tenant, "mug", None, ProductSnapshot::new("Mug", Money::from_cents(1250)))
            .await;
        catalog
            .insert(tenant, "tee", None, ProductSnapshot::new("Tee", Money::from_cents(2000)))
            .await;
        catalog
            .insert(
                tenant,
                "tee",
                Some(VariantId::new("XL")),
                ProductSnapshot::new("Tee XL", Money::from_cents(2200)),
            )
            .await;

        let ledger = Arc::new(InventoryLedger::new(InMemoryInventoryStore::new(), catalog));
        for (product, quantity) in stock {
            ledger
                .set_stock(tenant, ProductId::new(*product), None, *quantity)
                .await
                .unwrap();
        }

        Self {
            service: Arc::new(OrderService::new(InMemoryOrderStore::new(), ledger)),
            tenant,
        }
    }

    async fn stock(&self, product: &str) -> InventoryRecord {
        self.service
            .ledger()
            .get(self.tenant, ProductId::new(product), None)
            .await
            .unwrap()
    }

    async fn place(&self, lines: &[(&str, u32)]) -> Result<Order, DomainError> {
        self.service.create_order(self.tenant, request(lines)).await
    }

    async fn advance(&self, order: &Order, statuses: &[OrderStatus]) -> Order {
        let mut current = order.clone();
        for status in statuses {
            current = self
                .service
                .update(self.tenant, current.id(), StatusChange::to(*status))
                .await
                .unwrap()
                .order;
        }
        current
    }
}

fn request(lines: &[(&str, u32)]) -> NewOrder {
    NewOrder {
        order_number: None,
        customer_id: None,
        lines: lines
            .iter()
            .map(|(product, quantity)| NewOrderLine {
                product_id: ProductId::new(*product),
                variant_id: None,
                quantity: *quantity,
            })
            .collect(),
        discount: Money::ZERO,
        shipping: Money::from_cents(500),
        tax: Money::ZERO,
        payment_method: PaymentMethod::CashOnDelivery,
        source: OrderSource::Storefront,
        contact: ShippingContact {
            name: "Grace Hopper".to_string(),
            email: Some("grace@example.com".to_string()),
            ..Default::default()
        },
        note: None,
        actor: None,
    }
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn test_create_reserves_stock() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 2)]).await.unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.stock_state(), StockState::Reserved);
        assert_eq!(order.items()[0].name, "Mug");
        assert_eq!(order.totals().subtotal, Money::from_cents(2500));
        assert_eq!(order.totals().total, Money::from_cents(3000));
        assert!(order.order_number().starts_with("ORD-"));

        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (8, 2));

        let stored = fx.service.get_by_id(fx.tenant, order.id()).await.unwrap();
        assert_eq!(stored, order);
    }

    #[tokio::test]
    async fn test_insufficient_stock_cancels_the_order() {
        let fx = Fixture::new(&[("mug", 1)]).await;
        let err = fx.place(&[("mug", 2)]).await.unwrap_err();
        match err {
            DomainError::InsufficientStock {
                product_id,
                requested,
                available,
                ..
            } => {
                assert_eq!(product_id.as_str(), "mug");
                assert_eq!((requested, available), (2, 1));
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }

        let page = fx
            .service
            .list(fx.tenant, &OrderQuery::new().status(OrderStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        let order = &page.items[0];
        assert_eq!(order.cancel_reason(), Some(INSUFFICIENT_STOCK_REASON));
        assert_eq!(order.stock_state(), StockState::Unallocated);

        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (1, 0));
    }

    #[tokio::test]
    async fn test_partial_failure_rolls_back_earlier_lines() {
        let fx = Fixture::new(&[("mug", 10), ("tee", 0)]).await;
        let err = fx.place(&[("mug", 3), ("tee", 1)]).await.unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));

        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (10, 0));
    }

    #[tokio::test]
    async fn test_unknown_product_is_a_validation_error() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let err = fx.place(&[("ghost", 1)]).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(fx.service.orders().order_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_order_is_rejected() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let err = fx.place(&[]).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_order_number_conflicts() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let mut req = request(&[("mug", 1)]);
        req.order_number = Some("WEB-1001".to_string());
        fx.service.create_order(fx.tenant, req.clone()).await.unwrap();

        let err = fx.service.create_order(fx.tenant, req).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        let record = fx.stock("mug").await;
        assert_eq!(record.reserved, 1);
    }

    #[tokio::test]
    async fn test_variant_lines_use_the_variant_snapshot() {
        let fx = Fixture::new(&[]).await;
        fx.service
            .ledger()
            .set_stock(fx.tenant, ProductId::new("tee"), Some(VariantId::new("XL")), 4)
            .await
            .unwrap();

        let mut req = request(&[]);
        req.lines.push(NewOrderLine {
            product_id: ProductId::new("tee"),
            variant_id: Some(VariantId::new("XL")),
            quantity: 2,
        });
        let order = fx.service.create_order(fx.tenant, req).await.unwrap();
        assert_eq!(order.items()[0].name, "Tee XL");
        assert_eq!(order.items()[0].line_total, Money::from_cents(4400));

        let record = fx
            .service
            .ledger()
            .get(fx.tenant, ProductId::new("tee"), Some(VariantId::new("XL")))
            .await
            .unwrap();
        assert_eq!((record.available, record.reserved), (2, 2));
    }
}

mod transitions {
    use super::*;

    #[tokio::test]
    async fn test_cancel_returns_stock() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 2)]).await.unwrap();
        assert_eq!(fx.stock("mug").await.available, 8);

        let outcome = fx
            .service
            .update(
                fx.tenant,
                order.id(),
                StatusChange::to(OrderStatus::Cancelled).with_cancel_reason("changed mind"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.from, OrderStatus::Pending);
        assert_eq!(outcome.to, OrderStatus::Cancelled);
        assert_eq!(outcome.ledger_effect, LedgerEffect::Release);
        assert_eq!(outcome.order.cancel_reason(), Some("changed mind"));
        assert_eq!(outcome.order.stock_state(), StockState::Released);

        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (10, 0));
    }

    #[tokio::test]
    async fn test_confirm_appends_one_history_entry() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 1)]).await.unwrap();
        let before = order.history().len();

        let outcome = fx
            .service
            .update(fx.tenant, order.id(), StatusChange::to(OrderStatus::Confirmed))
            .await
            .unwrap();

        assert_eq!(outcome.order.status(), OrderStatus::Confirmed);
        assert_eq!(outcome.ledger_effect, LedgerEffect::None);
        assert_eq!(outcome.order.history().len(), before + 1);
        assert_eq!(
            outcome.order.history().last().unwrap().event,
            HistoryEvent::Status(OrderStatus::Confirmed)
        );
        let stored = fx.service.get_by_id(fx.tenant, order.id()).await.unwrap();
        assert_eq!(stored.history().len(), before + 1);
    }

    #[tokio::test]
    async fn test_delivery_commits_stock() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 3)]).await.unwrap();

        let shipped = fx
            .advance(
                &order,
                &[
                    OrderStatus::Confirmed,
                    OrderStatus::Processing,
                    OrderStatus::ReadyForPickup,
                    OrderStatus::Shipped,
                ],
            )
            .await;
        assert!(shipped.fulfillment().shipped_at.is_some());
        assert_eq!(fx.stock("mug").await.reserved, 3);

        let outcome = fx
            .service
            .update(fx.tenant, order.id(), StatusChange::to(OrderStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(outcome.ledger_effect, LedgerEffect::Commit);

        let record = fx.stock("mug").await;
        assert_eq!(
            (record.available, record.reserved, record.committed),
            (7, 0, 3)
        );
        assert_eq!(
            fx.service.ledger().catalog().mirrored_stock(fx.tenant, &ProductId::new("mug"), None).await,
            Some(7)
        );
    }

    #[tokio::test]
    async fn test_refund_after_delivery_leaves_stock_alone() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 1)]).await.unwrap();
        fx.advance(
            &order,
            &[
                OrderStatus::Confirmed,
                OrderStatus::Processing,
                OrderStatus::ReadyForPickup,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ],
        )
        .await;

        let outcome = fx
            .service
            .update(fx.tenant, order.id(), StatusChange::to(OrderStatus::Refunded))
            .await
            .unwrap();
        assert_eq!(outcome.ledger_effect, LedgerEffect::None);
        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.committed), (9, 1));
    }

    #[tokio::test]
    async fn test_skipping_ahead_is_rejected() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 2)]).await.unwrap();

        let err = fx
            .service
            .update(fx.tenant, order.id(), StatusChange::to(OrderStatus::Delivered))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered
            }
        ));

        let stored = fx.service.get_by_id(fx.tenant, order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        assert_eq!(stored.version(), order.version());
        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (8, 2));
    }

    #[tokio::test]
    async fn test_cancelled_is_terminal() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 2)]).await.unwrap();
        fx.advance(&order, &[OrderStatus::Cancelled]).await;

        let err = fx
            .service
            .update(fx.tenant, order.id(), StatusChange::to(OrderStatus::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(fx.stock("mug").await.available, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_release_once() {
        for _ in 0..25 {
            let fx = Fixture::new(&[("mug", 10)]).await;
            let order = fx.place(&[("mug", 4)]).await.unwrap();

            let tasks: Vec<_> = (0..2)
                .map(|_| {
                    let service = Arc::clone(&fx.service);
                    let tenant = fx.tenant;
                    let id = order.id();
                    tokio::spawn(async move {
                        service
                            .update(tenant, id, StatusChange::to(OrderStatus::Cancelled))
                            .await
                    })
                })
                .collect();

            let results: Vec<_> = futures_util::future::join_all(tasks)
                .await
                .into_iter()
                .map(|joined| joined.unwrap())
                .collect();
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.iter().any(|r| matches!(
                r,
                Err(DomainError::Conflict(_)) | Err(DomainError::InvalidTransition { .. })
            )));

            let record = fx.stock("mug").await;
            assert_eq!((record.available, record.reserved), (10, 0));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_never_oversell() {
        let fx = Fixture::new(&[("mug", 5)]).await;
        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let service = Arc::clone(&fx.service);
                let tenant = fx.tenant;
                tokio::spawn(async move { service.create_order(tenant, request(&[("mug", 1)])).await })
            })
            .collect();

        let results: Vec<_> = futures_util::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();
        let placed = results.iter().filter(|r| r.is_ok()).count();
        let short = results
            .iter()
            .filter(|r| matches!(r, Err(DomainError::InsufficientStock { .. })))
            .count();
        assert_eq!((placed, short), (5, 7));

        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (0, 5));
    }
}

mod tenancy {
    use super::*;

    #[tokio::test]
    async fn test_other_tenant_cannot_see_or_change_orders() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 2)]).await.unwrap();
        let intruder = TenantId::new();

        let err = fx.service.get_by_id(intruder, order.id()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        let err = fx
            .service
            .get_by_number(intruder, order.order_number())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        let err = fx
            .service
            .update(intruder, order.id(), StatusChange::to(OrderStatus::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        assert_eq!(fx.stock("mug").await.reserved, 2);
        let page = fx.service.list(intruder, &OrderQuery::new()).await.unwrap();
        assert_eq!(page.total, 0);
    }
}

mod tracking {
    use super::*;

    #[tokio::test]
    async fn test_repeated_paid_keeps_first_timestamp() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 1)]).await.unwrap();
        let paid = |tx: &str| PaymentUpdate {
            status: PaymentStatus::Paid,
            transaction_id: Some(tx.to_string()),
            note: None,
            actor: None,
        };

        let first = fx
            .service
            .update_payment_status(fx.tenant, order.id(), paid("tx-1"))
            .await
            .unwrap();
        let second = fx
            .service
            .update_payment_status(fx.tenant, order.id(), paid("tx-2"))
            .await
            .unwrap();

        assert_eq!(second.payment_status(), PaymentStatus::Paid);
        assert_eq!(second.payment().paid_at, first.payment().paid_at);
        assert_eq!(second.payment().transaction_id.as_deref(), Some("tx-2"));
        assert_eq!(second.status(), OrderStatus::Pending);
        assert_eq!(fx.stock("mug").await.reserved, 1);
    }

    #[tokio::test]
    async fn test_fulfillment_and_notes_append_history() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 1)]).await.unwrap();
        let actor = ActorId::new();

        let order = fx
            .service
            .update_fulfillment(
                fx.tenant,
                order.id(),
                FulfillmentUpdate {
                    provider: Some("ups".to_string()),
                    tracking_number: Some("1Z999".to_string()),
                    tracking_url: None,
                    actor: Some(actor),
                },
            )
            .await
            .unwrap();
        let order = fx
            .service
            .add_note(fx.tenant, order.id(), "gift wrap requested", Some(actor))
            .await
            .unwrap();

        let events: Vec<_> = order.history().iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                HistoryEvent::Status(OrderStatus::Pending),
                HistoryEvent::Fulfillment,
                HistoryEvent::Note
            ]
        );
        assert_eq!(order.history()[2].actor, Some(actor));
        assert_eq!(order.fulfillment().tracking_number.as_deref(), Some("1Z999"));
    }

    #[tokio::test]
    async fn test_blank_note_is_rejected() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = fx.place(&[("mug", 1)]).await.unwrap();
        let err = fx
            .service
            .add_note(fx.tenant, order.id(), "  ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}

mod listing {
    use super::*;

    #[tokio::test]
    async fn test_filters_search_and_paging() {
        let fx = Fixture::new(&[("mug", 100)]).await;
        let customer = CustomerId::new();
        let mut placed = Vec::new();
        for i in 0..5 {
            let mut req = request(&[("mug", 1)]);
            req.order_number = Some(format!("WEB-{i:03}"));
            if i % 2 == 0 {
                req.customer_id = Some(customer);
                req.payment_method = PaymentMethod::Card;
            }
            placed.push(fx.service.create_order(fx.tenant, req).await.unwrap());
            // Keep created_at strictly increasing.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        fx.advance(&placed[1], &[OrderStatus::Confirmed]).await;

        let all = fx.service.list(fx.tenant, &OrderQuery::new()).await.unwrap();
        assert_eq!(all.total, 5);
        let numbers: Vec<_> = all.items.iter().map(|o| o.order_number()).collect();
        assert_eq!(numbers, vec!["WEB-004", "WEB-003", "WEB-002", "WEB-001", "WEB-000"]);

        let by_customer = fx
            .service
            .list(fx.tenant, &OrderQuery::new().customer(customer))
            .await
            .unwrap();
        assert_eq!(by_customer.total, 3);

        let card = fx
            .service
            .list(fx.tenant, &OrderQuery::new().payment_method(PaymentMethod::Card))
            .await
            .unwrap();
        assert_eq!(card.total, 3);

        let confirmed = fx
            .service
            .list(fx.tenant, &OrderQuery::new().status(OrderStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(confirmed.items[0].order_number(), "WEB-001");

        let searched = fx
            .service
            .list(fx.tenant, &OrderQuery::new().search("web-00"))
            .await
            .unwrap();
        assert_eq!(searched.total, 5);
        let by_email = fx
            .service
            .list(fx.tenant, &OrderQuery::new().search("GRACE@"))
            .await
            .unwrap();
        assert_eq!(by_email.total, 5);

        let page = fx
            .service
            .list(fx.tenant, &OrderQuery::new().page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        let numbers: Vec<_> = page.items.iter().map(|o| o.order_number()).collect();
        assert_eq!(numbers, vec!["WEB-002", "WEB-001"]);

        let found = fx.service.get_by_number(fx.tenant, "WEB-003").await.unwrap();
        assert_eq!(found.id(), placed[3].id());
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected() {
        let fx = Fixture::new(&[]).await;
        let err = fx
            .service
            .list(fx.tenant, &OrderQuery::new().page(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}

mod reconciliation {
    use super::*;

    /// An order written as stock-pending whose checkout never finished.
    async fn interrupted_checkout(fx: &Fixture, age: Duration, quantity: u32) -> Order {
        let now = Utc::now() - age;
        let req = request(&[("mug", quantity)]);
        let items = vec![orders::OrderItem::new(
            ProductId::new("mug"),
            None,
            ProductSnapshot::new("Mug", Money::from_cents(1250)),
            quantity,
        )
        .unwrap()];
        let order = Order::place(
            fx.tenant,
            orders::generate_order_number(now),
            &req,
            items,
            now,
        )
        .unwrap();
        fx.service.orders().insert(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_sweep_cancels_stale_pending_checkouts() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let stale = interrupted_checkout(&fx, Duration::minutes(30), 2).await;
        let fresh = interrupted_checkout(&fx, Duration::minutes(1), 2).await;
        let healthy = fx.place(&[("mug", 1)]).await.unwrap();

        let swept = fx
            .service
            .sweep_stale_checkouts(Utc::now(), Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(swept, vec![stale.id()]);

        let stale = fx.service.get_by_id(fx.tenant, stale.id()).await.unwrap();
        assert_eq!(stale.status(), OrderStatus::Cancelled);
        assert_eq!(stale.stock_state(), StockState::Unallocated);
        assert_eq!(stale.cancel_reason(), Some(ABANDONED_CHECKOUT_REASON));

        let fresh = fx.service.get_by_id(fx.tenant, fresh.id()).await.unwrap();
        assert_eq!(fresh.stock_state(), StockState::Pending);
        let healthy = fx.service.get_by_id(fx.tenant, healthy.id()).await.unwrap();
        assert_eq!(healthy.status(), OrderStatus::Pending);

        // Nothing was reserved for the stale order, so nothing is released.
        let record = fx.stock("mug").await;
        assert_eq!((record.available, record.reserved), (9, 1));

        let again = fx
            .service
            .sweep_stale_checkouts(Utc::now(), Duration::minutes(15))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_rejects_out_of_range_timeout() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        let order = interrupted_checkout(&fx, Duration::minutes(30), 1).await;

        let err = fx
            .service
            .sweep_stale_checkouts(Utc::now(), Duration::seconds(10_000_000_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let untouched = fx.service.get_by_id(fx.tenant, order.id()).await.unwrap();
        assert_eq!(untouched.stock_state(), StockState::Pending);
    }

    #[tokio::test]
    async fn test_drift_reports_unclaimed_reservations() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        fx.place(&[("mug", 2)]).await.unwrap();
        assert!(fx.service.reservation_drift(fx.tenant).await.unwrap().is_empty());

        // Reserved behind the order service's back.
        fx.service
            .ledger()
            .reserve(fx.tenant, &[StockLine::new("mug", None, 3)])
            .await
            .unwrap();
        let drift = fx.service.reservation_drift(fx.tenant).await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].ledger_reserved, 5);
        assert_eq!(drift[0].claimed, 2);
        assert_eq!(drift[0].leaked(), 3);

        // An in-flight checkout accounts for the extra units.
        interrupted_checkout(&fx, Duration::zero(), 3).await;
        assert!(fx.service.reservation_drift(fx.tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drift_reports_claims_the_ledger_lost() {
        let fx = Fixture::new(&[("mug", 10)]).await;
        fx.place(&[("mug", 4)]).await.unwrap();
        fx.service
            .ledger()
            .release(fx.tenant, &[StockLine::new("mug", None, 4)])
            .await
            .unwrap();

        let drift = fx.service.reservation_drift(fx.tenant).await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].missing(), 4);
    }
}

mod checkout_race {
    use super::*;

    use async_trait::async_trait;
    use inventory::{InventoryStore, StockKey, StockSettings};
    use tokio::sync::Semaphore;

    /// Holds every reservation until the test opens the gate.
    struct GatedStore {
        inner: InMemoryInventoryStore,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl InventoryStore for GatedStore {
        async fn get(&self, key: &StockKey) -> inventory::Result<Option<InventoryRecord>> {
            self.inner.get(key).await
        }

        async fn try_reserve(
            &self,
            key: &StockKey,
            quantity: u32,
        ) -> inventory::Result<Option<InventoryRecord>> {
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.try_reserve(key, quantity).await
        }

        async fn release(
            &self,
            key: &StockKey,
            quantity: u32,
        ) -> inventory::Result<Option<InventoryRecord>> {
            self.inner.release(key, quantity).await
        }

        async fn confirm(
            &self,
            key: &StockKey,
            quantity: u32,
        ) -> inventory::Result<Option<InventoryRecord>> {
            self.inner.confirm(key, quantity).await
        }

        async fn set_available(
            &self,
            key: &StockKey,
            quantity: u32,
        ) -> inventory::Result<InventoryRecord> {
            self.inner.set_available(key, quantity).await
        }

        async fn try_adjust(
            &self,
            key: &StockKey,
            delta: i64,
        ) -> inventory::Result<Option<InventoryRecord>> {
            self.inner.try_adjust(key, delta).await
        }

        async fn configure(
            &self,
            key: &StockKey,
            settings: &StockSettings,
        ) -> inventory::Result<InventoryRecord> {
            self.inner.configure(key, settings).await
        }

        async fn list(&self, tenant_id: TenantId) -> inventory::Result<Vec<InventoryRecord>> {
            self.inner.list(tenant_id).await
        }

        async fn low_stock(&self, tenant_id: TenantId) -> inventory::Result<Vec<InventoryRecord>> {
            self.inner.low_stock(tenant_id).await
        }
    }

    type GatedService = OrderService<InMemoryOrderStore, GatedStore, InMemoryProductCatalog>;

    async fn gated_service(tenant: TenantId, gate: Arc<Semaphore>) -> Arc<GatedService> {
        let catalog = InMemoryProductCatalog::new();
        catalog
            .insert(tenant, "mug", None, ProductSnapshot::new("Mug", Money::from_cents(1250)))
            .await;
        let store = GatedStore {
            inner: InMemoryInventoryStore::new(),
            gate,
        };
        let ledger = Arc::new(InventoryLedger::new(store, catalog));
        ledger
            .set_stock(tenant, ProductId::new("mug"), None, 10)
            .await
            .unwrap();
        Arc::new(OrderService::new(InMemoryOrderStore::new(), ledger))
    }

    async fn wait_for_order(service: &GatedService, tenant: TenantId) -> Order {
        loop {
            let page = service.list(tenant, &OrderQuery::new()).await.unwrap();
            if let Some(order) = page.items.into_iter().next() {
                return order;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_order_cannot_advance_while_stock_is_being_reserved() {
        let tenant = TenantId::new();
        let gate = Arc::new(Semaphore::new(0));
        let service = gated_service(tenant, Arc::clone(&gate)).await;

        let checkout = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.create_order(tenant, request(&[("mug", 3)])).await })
        };
        let pending = wait_for_order(&service, tenant).await;
        assert_eq!(pending.stock_state(), StockState::Pending);

        let err = service
            .update(tenant, pending.id(), StatusChange::to(OrderStatus::Confirmed))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        let unchanged = service.get_by_id(tenant, pending.id()).await.unwrap();
        assert_eq!(unchanged.status(), OrderStatus::Pending);
        assert_eq!(unchanged.history().len(), 1);

        gate.add_permits(16);
        let order = checkout.await.unwrap().unwrap();
        assert_eq!(order.stock_state(), StockState::Reserved);

        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::ReadyForPickup,
            OrderStatus::Shipped,
        ] {
            service
                .update(tenant, order.id(), StatusChange::to(status))
                .await
                .unwrap();
        }
        let outcome = service
            .update(tenant, order.id(), StatusChange::to(OrderStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(outcome.ledger_effect, LedgerEffect::Commit);

        let record = service
            .ledger()
            .get(tenant, ProductId::new("mug"), None)
            .await
            .unwrap();
        assert_eq!(
            (record.available, record.reserved, record.committed),
            (7, 0, 3)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_checkout_returns_reserved_stock() {
        let tenant = TenantId::new();
        let gate = Arc::new(Semaphore::new(0));
        let service = gated_service(tenant, Arc::clone(&gate)).await;

        let checkout = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.create_order(tenant, request(&[("mug", 3)])).await })
        };
        let pending = wait_for_order(&service, tenant).await;

        let outcome = service
            .update(tenant, pending.id(), StatusChange::to(OrderStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(outcome.ledger_effect, LedgerEffect::None);

        gate.add_permits(16);
        let order = checkout.await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.stock_state(), StockState::Released);

        let record = service
            .ledger()
            .get(tenant, ProductId::new("mug"), None)
            .await
            .unwrap();
        assert_eq!((record.available, record.reserved), (10, 0));
    }
}
