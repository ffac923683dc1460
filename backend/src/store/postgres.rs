//! PostgreSQL ledger store
//!
//! Row locks are taken with `SELECT … FOR UPDATE`; uniqueness and referential
//! integrity are enforced by the schema in `migrations/` and classified by
//! [`crate::error::classify_db_code`].

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use shared::{
    InventoryItem, ItemDetails, ItemWrite, LogEntry, Movement, MovementView, NewAuditEntry,
    NewMovement, NewReceipt, NewReceiptItem, OperationState, OperationStatus, Receipt,
    ReceiptHeaderPatch, ReceiptItem, ReceiptSummary, STATUS_IN_STOCK,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::{LedgerStore, LedgerTx};
use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Ledger backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgLedgerStore {
    db: PgPool,
}

impl PgLedgerStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Build the pool, applying the configured statement timeout to every connection
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let mut options = PgConnectOptions::from_str(&config.url)?;
        if config.statement_timeout_ms > 0 {
            options = options.options([(
                "statement_timeout",
                config.statement_timeout_ms.to_string(),
            )]);
        }

        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        Ok(Self::new(db))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.db).await
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct ItemRow {
    id: String,
    category: Option<String>,
    name: Option<String>,
    keyword: Option<String>,
    sku: Option<String>,
    quantity: i64,
    cost: Decimal,
    price: Decimal,
    location: Option<String>,
    status: Option<String>,
    notes: Option<String>,
    metadata: Value,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for InventoryItem {
    fn from(row: ItemRow) -> Self {
        InventoryItem {
            id: row.id,
            category: row.category,
            name: row.name,
            keyword: row.keyword,
            sku: row.sku,
            quantity: row.quantity,
            cost: row.cost,
            price: row.price,
            location: row.location,
            status: row.status,
            notes: row.notes,
            metadata: row.metadata,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: i64,
    inventory_id: String,
    qty_delta: i64,
    reason: String,
    unit_cost: Option<Decimal>,
    unit_cost_used: Option<Decimal>,
    on_hand_after: i64,
    avg_cost_after: Decimal,
    ref_type: Option<String>,
    ref_id: Option<String>,
    request_id: Option<String>,
    operation_id: String,
    occurred_at: DateTime<Utc>,
}

impl From<MovementRow> for Movement {
    fn from(row: MovementRow) -> Self {
        Movement {
            id: row.id,
            inventory_id: row.inventory_id,
            qty_delta: row.qty_delta,
            reason: row.reason,
            unit_cost: row.unit_cost,
            unit_cost_used: row.unit_cost_used,
            on_hand_after: row.on_hand_after,
            avg_cost_after: row.avg_cost_after,
            ref_type: row.ref_type,
            ref_id: row.ref_id,
            request_id: row.request_id,
            operation_id: row.operation_id,
            occurred_at: row.occurred_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MovementHistoryRow {
    #[sqlx(flatten)]
    movement: MovementRow,
    vendor: Option<String>,
    receipt_received_at: Option<DateTime<Utc>>,
    prev_qty: i64,
    prev_cost: Decimal,
}

#[derive(Debug, FromRow)]
struct ReceiptRow {
    id: i64,
    received_at: DateTime<Utc>,
    vendor: Option<String>,
    mode: String,
    notes: Option<String>,
    images: Json<Vec<String>>,
    operation_id: String,
    request_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ReceiptRow> for Receipt {
    fn from(row: ReceiptRow) -> Self {
        Receipt {
            id: row.id,
            received_at: row.received_at,
            vendor: row.vendor,
            mode: row.mode,
            notes: row.notes,
            images: row.images.0,
            operation_id: row.operation_id,
            request_id: row.request_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReceiptItemRow {
    id: i64,
    receipt_id: i64,
    inventory_id: String,
    qty_received: i64,
    unit_cost: Decimal,
    line_total: Decimal,
    display_name: String,
    sku: String,
}

impl From<ReceiptItemRow> for ReceiptItem {
    fn from(row: ReceiptItemRow) -> Self {
        ReceiptItem {
            id: row.id,
            receipt_id: row.receipt_id,
            inventory_id: row.inventory_id,
            qty_received: row.qty_received,
            unit_cost: row.unit_cost,
            line_total: row.line_total,
            display_name: row.display_name,
            sku: row.sku,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReceiptSummaryRow {
    id: i64,
    received_at: DateTime<Utc>,
    vendor: Option<String>,
    mode: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    operation_id: String,
    total_amount: Decimal,
}

#[derive(Debug, FromRow)]
struct LogRow {
    id: String,
    timestamp: i64,
    log_type: Option<String>,
    title: Option<String>,
    msg: Option<String>,
    meta: Option<Value>,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            id: row.id,
            timestamp: row.timestamp,
            log_type: row.log_type,
            title: row.title,
            msg: row.msg,
            meta: row.meta,
        }
    }
}

const RECEIPT_ITEM_COLUMNS: &str = r#"
    ri.id, ri.receipt_id, ri.inventory_id, ri.qty_received, ri.unit_cost, ri.line_total,
    COALESCE(i.name, i.sku, ri.inventory_id) AS display_name,
    COALESCE(i.sku, '') AS sku
"#;

// ============================================================================
// Transaction
// ============================================================================

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn begin_operation(
        &mut self,
        operation_id: &str,
        endpoint: &str,
    ) -> AppResult<OperationState> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (operation_id, endpoint, status)
            VALUES ($1, $2, 'IN_PROGRESS')
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(operation_id)
        .bind(endpoint)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(OperationState::New);
        }

        let row = sqlx::query_as::<_, (String, Option<String>, Option<Value>)>(
            "SELECT status, endpoint, response_json FROM idempotency_keys WHERE operation_id = $1",
        )
        .bind(operation_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(match row {
            None => OperationState::New,
            Some((status, endpoint, Some(response)))
                if OperationStatus::parse(&status) == Some(OperationStatus::Done) =>
            {
                OperationState::Done { endpoint, response }
            }
            Some(_) => OperationState::InProgress,
        })
    }

    async fn complete_operation(&mut self, operation_id: &str, response: &Value) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = 'DONE', response_json = $2
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .bind(response)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_item(&mut self, id: &str) -> AppResult<Option<InventoryItem>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM inventory WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn get_item(&mut self, id: &str) -> AppResult<Option<InventoryItem>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM inventory WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn create_item_if_absent(&mut self, id: &str, details: &ItemDetails) -> AppResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO inventory (
                id, category, name, keyword, sku, price, location, status, notes, metadata
            )
            VALUES (
                $1, $2, $3, $4, NULLIF(btrim($5), ''), COALESCE($6, 0), $7,
                COALESCE($8, $9), $10, COALESCE($11, '{}'::jsonb)
            )
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&details.category)
        .bind(&details.name)
        .bind(&details.keyword)
        .bind(&details.sku)
        .bind(details.price)
        .bind(&details.location)
        .bind(&details.status)
        .bind(STATUS_IN_STOCK)
        .bind(&details.notes)
        .bind(&details.metadata)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn update_item(&mut self, id: &str, write: &ItemWrite) -> AppResult<InventoryItem> {
        let details = &write.details;
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            UPDATE inventory SET
                category = COALESCE($2, category),
                name = COALESCE($3, name),
                keyword = COALESCE($4, keyword),
                sku = CASE WHEN $5 THEN NULLIF(btrim($6), '') ELSE sku END,
                price = COALESCE($7, price),
                location = COALESCE($8, location),
                status = COALESCE($9, status),
                notes = COALESCE($10, notes),
                metadata = COALESCE($11, metadata),
                quantity = COALESCE($12, quantity),
                cost = COALESCE($13, cost),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&details.category)
        .bind(&details.name)
        .bind(&details.keyword)
        .bind(details.sku.is_some())
        .bind(&details.sku)
        .bind(details.price)
        .bind(&details.location)
        .bind(&details.status)
        .bind(&details.notes)
        .bind(&details.metadata)
        .bind(write.quantity)
        .bind(write.cost)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::not_found("Inventory item", id))?;

        Ok(row.into())
    }

    async fn delete_item(&mut self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM inventory WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn count_receipt_refs(&mut self, id: &str) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM inbound_receipt_items WHERE inventory_id = $1",
        )
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn list_items(&mut self, include_archived: bool) -> AppResult<Vec<InventoryItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT * FROM inventory
            WHERE $1 OR status IS NULL OR lower(btrim(status)) <> 'archived'
            ORDER BY category, name, id
            "#,
        )
        .bind(include_archived)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn item_movements(&mut self, id: &str, limit: i64) -> AppResult<Vec<MovementView>> {
        let rows = sqlx::query_as::<_, MovementHistoryRow>(
            r#"
            SELECT * FROM (
                SELECT
                    m.*,
                    r.vendor,
                    r.received_at AS receipt_received_at,
                    m.on_hand_after - m.qty_delta AS prev_qty,
                    COALESCE(
                        LAG(m.avg_cost_after) OVER (ORDER BY m.occurred_at, m.id),
                        0
                    ) AS prev_cost
                FROM inventory_movements m
                LEFT JOIN inbound_receipts r
                    ON m.ref_type = 'RECEIPT' AND r.id::text = m.ref_id
                WHERE m.inventory_id = $1
            ) history
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MovementView {
                movement: row.movement.into(),
                vendor: row.vendor,
                receipt_received_at: row.receipt_received_at,
                prev_qty: row.prev_qty,
                prev_cost: row.prev_cost,
            })
            .collect())
    }

    async fn insert_movement(&mut self, movement: &NewMovement) -> AppResult<Movement> {
        let row = sqlx::query_as::<_, MovementRow>(
            r#"
            INSERT INTO inventory_movements (
                inventory_id, qty_delta, reason, unit_cost, unit_cost_used,
                on_hand_after, avg_cost_after, ref_type, ref_id, request_id, operation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(&movement.inventory_id)
        .bind(movement.qty_delta)
        .bind(movement.reason.as_str())
        .bind(movement.unit_cost)
        .bind(movement.unit_cost_used)
        .bind(movement.on_hand_after)
        .bind(movement.avg_cost_after)
        .bind(movement.ref_type.as_str())
        .bind(&movement.ref_id)
        .bind(&movement.request_id)
        .bind(&movement.operation_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn insert_audit(&mut self, entry: &NewAuditEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, sku, name, type, qty_change, unit_cost, total_value, ref_id, operator
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&entry.sku)
        .bind(&entry.name)
        .bind(&entry.entry_type)
        .bind(entry.qty_change)
        .bind(entry.unit_cost)
        .bind(entry.total_value)
        .bind(&entry.ref_id)
        .bind(&entry.operator)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_receipt(&mut self, receipt: &NewReceipt) -> AppResult<Receipt> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            r#"
            INSERT INTO inbound_receipts (
                received_at, vendor, mode, notes, images, request_id, operation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(receipt.received_at)
        .bind(&receipt.vendor)
        .bind(&receipt.mode)
        .bind(&receipt.notes)
        .bind(Json(&receipt.images))
        .bind(&receipt.request_id)
        .bind(&receipt.operation_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn receipt_by_operation(&mut self, operation_id: &str) -> AppResult<Option<Receipt>> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            "SELECT * FROM inbound_receipts WHERE operation_id = $1",
        )
        .bind(operation_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_receipt(&mut self, id: i64) -> AppResult<Option<Receipt>> {
        let row = sqlx::query_as::<_, ReceiptRow>("SELECT * FROM inbound_receipts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn lock_receipt(&mut self, id: i64) -> AppResult<Option<Receipt>> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            "SELECT * FROM inbound_receipts WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn update_receipt_header(
        &mut self,
        id: i64,
        patch: &ReceiptHeaderPatch,
    ) -> AppResult<Receipt> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            r#"
            UPDATE inbound_receipts SET
                received_at = COALESCE($2, received_at),
                vendor = CASE WHEN $3 THEN $4 ELSE vendor END,
                mode = COALESCE($5, mode),
                notes = CASE WHEN $6 THEN $7 ELSE notes END,
                images = COALESCE($8, images)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.received_at)
        .bind(patch.vendor.is_some())
        .bind(patch.vendor.clone().flatten())
        .bind(&patch.mode)
        .bind(patch.notes.is_some())
        .bind(patch.notes.clone().flatten())
        .bind(patch.images.as_ref().map(Json))
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::not_found("Receipt", id.to_string()))?;
        Ok(row.into())
    }

    async fn delete_receipt(&mut self, id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM inbound_receipts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_receipts(&mut self, limit: i64) -> AppResult<Vec<ReceiptSummary>> {
        let rows = sqlx::query_as::<_, ReceiptSummaryRow>(
            r#"
            SELECT
                r.id, r.received_at, r.vendor, r.mode, r.notes, r.created_at, r.operation_id,
                COALESCE(SUM(ri.line_total), 0) AS total_amount
            FROM inbound_receipts r
            LEFT JOIN inbound_receipt_items ri ON ri.receipt_id = r.id
            GROUP BY r.id
            ORDER BY r.received_at DESC, r.id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ReceiptSummary {
                id: row.id,
                received_at: row.received_at,
                vendor: row.vendor,
                mode: row.mode,
                notes: row.notes,
                created_at: row.created_at,
                operation_id: row.operation_id,
                total_amount: row.total_amount,
            })
            .collect())
    }

    async fn receipt_items(&mut self, receipt_id: i64) -> AppResult<Vec<ReceiptItem>> {
        let sql = format!(
            r#"
            SELECT {RECEIPT_ITEM_COLUMNS}
            FROM inbound_receipt_items ri
            LEFT JOIN inventory i ON i.id = ri.inventory_id
            WHERE ri.receipt_id = $1
            ORDER BY ri.id
            "#
        );
        let rows = sqlx::query_as::<_, ReceiptItemRow>(&sql)
            .bind(receipt_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_receipt_item(&mut self, item: &NewReceiptItem) -> AppResult<ReceiptItem> {
        let sql = format!(
            r#"
            WITH ri AS (
                INSERT INTO inbound_receipt_items (receipt_id, inventory_id, qty_received, unit_cost)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            )
            SELECT {RECEIPT_ITEM_COLUMNS}
            FROM ri
            LEFT JOIN inventory i ON i.id = ri.inventory_id
            "#
        );
        let row = sqlx::query_as::<_, ReceiptItemRow>(&sql)
            .bind(item.receipt_id)
            .bind(&item.inventory_id)
            .bind(item.qty_received)
            .bind(item.unit_cost)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.into())
    }

    async fn update_receipt_item(
        &mut self,
        id: i64,
        qty_received: i64,
        unit_cost: Decimal,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE inbound_receipt_items SET qty_received = $2, unit_cost = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(qty_received)
        .bind(unit_cost)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_receipt_item(&mut self, id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM inbound_receipt_items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_log(&mut self, entry: &LogEntry) -> AppResult<LogEntry> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            INSERT INTO logs (id, timestamp, type, title, msg, meta)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, timestamp, type AS log_type, title, msg, meta
            "#,
        )
        .bind(&entry.id)
        .bind(entry.timestamp)
        .bind(&entry.log_type)
        .bind(&entry.title)
        .bind(&entry.msg)
        .bind(&entry.meta)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn list_logs(&mut self, limit: i64) -> AppResult<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, timestamp, type AS log_type, title, msg, meta
            FROM logs
            ORDER BY timestamp DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
