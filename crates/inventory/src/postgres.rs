use async_trait::async_trait;
use common::{ProductId, TenantId, VariantId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{InventoryError, InventoryRecord, InventoryStore, Result, StockKey, StockSettings};

/// Upper-bound check on every counter column.
const COUNTER_RANGE_CONSTRAINT: &str = "inventory_counters_in_range";

const RETURNING: &str = "RETURNING tenant_id, product_id, variant_id, available, reserved, \
                         committed, incoming, low_stock_threshold, updated_at";

/// PostgreSQL-backed inventory store.
///
/// Every primitive is a single `UPDATE`/`INSERT ... ON CONFLICT` statement
/// whose `WHERE` clause carries the precondition, so the row lock taken by
/// the statement serialises concurrent writers on the same key.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        let variant: String = row.try_get("variant_id")?;
        let key = StockKey {
            tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            variant_id: (!variant.is_empty()).then(|| VariantId::new(variant)),
        };

        Ok(InventoryRecord {
            key,
            available: counter(&row, "available")?,
            reserved: counter(&row, "reserved")?,
            committed: counter(&row, "committed")?,
            incoming: counter(&row, "incoming")?,
            low_stock_threshold: counter(&row, "low_stock_threshold")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_one_optional(
        &self,
        sql: &str,
        key: &StockKey,
        value: i64,
    ) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(sql)
            .bind(key.tenant_id.as_uuid())
            .bind(key.product_id.as_str())
            .bind(variant_column(key))
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| range_error(key, e))?;
        row.map(Self::row_to_record).transpose()
    }
}

fn variant_column(key: &StockKey) -> &str {
    key.variant_id.as_ref().map(VariantId::as_str).unwrap_or("")
}

/// A write the range constraint refused never landed, so it is reported as
/// a rejected input rather than a storage failure.
fn range_error(key: &StockKey, e: sqlx::Error) -> InventoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.constraint() == Some(COUNTER_RANGE_CONSTRAINT)
    {
        return InventoryError::Validation(format!("stock counter out of range for {key}"));
    }
    InventoryError::Database(e)
}

fn counter(row: &PgRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| {
        sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        }
        .into()
    })
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn get(&self, key: &StockKey) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, product_id, variant_id, available, reserved, committed,
                   incoming, low_stock_threshold, updated_at
            FROM inventory_records
            WHERE tenant_id = $1 AND product_id = $2 AND variant_id = $3
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn try_reserve(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>> {
        let sql = format!(
            r#"
            UPDATE inventory_records
            SET available = available - $4, reserved = reserved + $4, updated_at = NOW()
            WHERE tenant_id = $1 AND product_id = $2 AND variant_id = $3 AND available >= $4
            {RETURNING}
            "#
        );
        self.fetch_one_optional(&sql, key, i64::from(quantity)).await
    }

    async fn release(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>> {
        // SET expressions all read the pre-update row, so LEAST sees the old reserved count.
        let sql = format!(
            r#"
            UPDATE inventory_records
            SET available = available + LEAST($4, reserved),
                reserved = reserved - LEAST($4, reserved),
                updated_at = NOW()
            WHERE tenant_id = $1 AND product_id = $2 AND variant_id = $3
            {RETURNING}
            "#
        );
        self.fetch_one_optional(&sql, key, i64::from(quantity)).await
    }

    async fn confirm(&self, key: &StockKey, quantity: u32) -> Result<Option<InventoryRecord>> {
        let sql = format!(
            r#"
            UPDATE inventory_records
            SET committed = committed + LEAST($4, reserved),
                reserved = reserved - LEAST($4, reserved),
                updated_at = NOW()
            WHERE tenant_id = $1 AND product_id = $2 AND variant_id = $3
            {RETURNING}
            "#
        );
        self.fetch_one_optional(&sql, key, i64::from(quantity)).await
    }

    async fn set_available(&self, key: &StockKey, quantity: u32) -> Result<InventoryRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_records (tenant_id, product_id, variant_id, available)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, product_id, variant_id) DO UPDATE SET
                available = EXCLUDED.available,
                updated_at = NOW()
            {RETURNING}
            "#
        ))
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .bind(i64::from(quantity))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_record(row)
    }

    async fn try_adjust(&self, key: &StockKey, delta: i64) -> Result<Option<InventoryRecord>> {
        let sql = if delta >= 0 {
            format!(
                r#"
                INSERT INTO inventory_records (tenant_id, product_id, variant_id, available)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, product_id, variant_id) DO UPDATE SET
                    available = inventory_records.available + EXCLUDED.available,
                    updated_at = NOW()
                {RETURNING}
                "#
            )
        } else {
            format!(
                r#"
                UPDATE inventory_records
                SET available = available + $4, updated_at = NOW()
                WHERE tenant_id = $1 AND product_id = $2 AND variant_id = $3
                  AND available + $4 >= 0
                {RETURNING}
                "#
            )
        };
        self.fetch_one_optional(&sql, key, delta).await
    }

    async fn configure(
        &self,
        key: &StockKey,
        settings: &StockSettings,
    ) -> Result<InventoryRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_records (tenant_id, product_id, variant_id, incoming, low_stock_threshold)
            VALUES ($1, $2, $3, COALESCE($4::BIGINT, 0), COALESCE($5::BIGINT, {default}))
            ON CONFLICT (tenant_id, product_id, variant_id) DO UPDATE SET
                incoming = COALESCE($4::BIGINT, inventory_records.incoming),
                low_stock_threshold = COALESCE($5::BIGINT, inventory_records.low_stock_threshold),
                updated_at = NOW()
            {RETURNING}
            "#,
            default = crate::DEFAULT_LOW_STOCK_THRESHOLD,
        ))
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .bind(settings.incoming.map(i64::from))
        .bind(settings.low_stock_threshold.map(i64::from))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_record(row)
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, product_id, variant_id, available, reserved, committed,
                   incoming, low_stock_threshold, updated_at
            FROM inventory_records
            WHERE tenant_id = $1
            ORDER BY product_id ASC, variant_id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn low_stock(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, product_id, variant_id, available, reserved, committed,
                   incoming, low_stock_threshold, updated_at
            FROM inventory_records
            WHERE tenant_id = $1 AND available <= low_stock_threshold
            ORDER BY available ASC, product_id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
