use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, TenantId, Version};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};

use crate::error::StoreError;
use crate::order::Order;
use crate::query::{OrderPage, OrderQuery};
use crate::status::StockState;
use crate::store::{OrderStore, StoreResult};

/// PostgreSQL-backed order store.
///
/// The whole aggregate lives in a JSONB `document`; the filterable fields
/// are duplicated into columns on every write. `version` is authoritative.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: PgRow) -> StoreResult<Order> {
        let document: serde_json::Value = row.try_get("document")?;
        let version: i64 = row.try_get("version")?;
        let mut order: Order = serde_json::from_value(document)?;
        order.set_version(Version::new(version));
        Ok(order)
    }

    async fn current_version(&self, order: &Order) -> StoreResult<Option<i64>> {
        let version = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 AND tenant_id = $2")
            .bind(order.id().as_uuid())
            .bind(order.tenant_id().as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &OrderQuery) {
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(status) = query.payment_status {
        qb.push(" AND payment_status = ").push_bind(status.as_str());
    }
    if let Some(method) = query.payment_method {
        qb.push(" AND payment_method = ").push_bind(method.as_str());
    }
    if let Some(source) = query.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(customer_id) = query.customer_id {
        qb.push(" AND customer_id = ").push_bind(customer_id.as_uuid());
    }
    if let Some(from) = query.date_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = query.date_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some(needle) = query.search_needle() {
        let pattern = format!("%{}%", escape_like(&needle));
        qb.push(" AND (");
        for (i, column) in ["order_number", "contact_name", "contact_email", "contact_phone"]
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(format!("LOWER({column}) LIKE "))
                .push_bind(pattern.clone());
        }
        qb.push(")");
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let document = serde_json::to_value(order)?;
        let contact = order.contact();

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, order_number, customer_id, status, payment_status,
                payment_method, source, stock_state, contact_name, contact_email,
                contact_phone, version, created_at, updated_at, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.tenant_id().as_uuid())
        .bind(order.order_number())
        .bind(order.customer_id().map(|c| c.as_uuid()))
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.payment_method().as_str())
        .bind(order.source().as_str())
        .bind(order.stock_state().as_str())
        .bind(&contact.name)
        .bind(contact.email.as_deref())
        .bind(contact.phone.as_deref())
        .bind(order.version().as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_tenant_order_number")
            {
                return StoreError::DuplicateOrderNumber(order.order_number().to_string());
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: OrderId) -> StoreResult<Option<Order>> {
        let row = sqlx::query(
            "SELECT document, version FROM orders WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_by_number(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> StoreResult<Option<Order>> {
        let row = sqlx::query(
            "SELECT document, version FROM orders WHERE tenant_id = $1 AND order_number = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn update(&self, order: &Order, expected: Version) -> StoreResult<Version> {
        let next = expected.next();
        let mut updated = order.clone();
        updated.set_version(next);
        let document = serde_json::to_value(&updated)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_status = $4, stock_state = $5,
                version = $6, updated_at = $7, document = $8
            WHERE id = $1 AND tenant_id = $2 AND version = $9
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.tenant_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.stock_state().as_str())
        .bind(next.as_i64())
        .bind(order.updated_at())
        .bind(document)
        .bind(expected.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(next);
        }
        match self.current_version(order).await? {
            Some(actual) => Err(StoreError::ConcurrencyConflict {
                expected: expected.as_i64(),
                actual,
            }),
            None => Err(StoreError::NotFound(format!("Order {}", order.id()))),
        }
    }

    async fn list(&self, tenant_id: TenantId, query: &OrderQuery) -> StoreResult<OrderPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders WHERE tenant_id = ");
        count.push_bind(tenant_id.as_uuid());
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new("SELECT document, version FROM orders WHERE tenant_id = ");
        select.push_bind(tenant_id.as_uuid());
        push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.page_size()))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));
        let rows = select.build().fetch_all(&self.pool).await?;

        let items = rows
            .into_iter()
            .map(Self::row_to_order)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(OrderPage {
            items,
            total: u64::try_from(total).unwrap_or_default(),
            page: query.page_number(),
            limit: query.page_size(),
        })
    }

    async fn find_by_stock_state(
        &self,
        tenant_id: Option<TenantId>,
        state: StockState,
        created_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT document, version FROM orders
            WHERE stock_state = $1
              AND ($2::UUID IS NULL OR tenant_id = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at < $3)
            ORDER BY created_at
            "#,
        )
        .bind(state.as_str())
        .bind(tenant_id.map(|t| t.as_uuid()))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}
