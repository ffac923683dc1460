//! In-memory ledger store
//!
//! Used by tests and by local runs without a database. A transaction holds the
//! single store lock for its whole lifetime and works on a private copy of the
//! state that is written back on commit, so transactions are serialized and a
//! dropped transaction leaves no trace. Constraint violations are reported
//! with the same SQLSTATE classification the Postgres store uses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use shared::{
    normalize_sku, sku_key, InventoryItem, ItemDetails, ItemWrite, LogEntry, Movement,
    MovementReason, MovementRef, MovementView, NewAuditEntry, NewMovement, NewReceipt,
    NewReceiptItem, OperationState, OperationStatus, Receipt, ReceiptHeaderPatch, ReceiptItem,
    ReceiptSummary, STATUS_IN_STOCK,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{with_previous_state, LedgerStore, LedgerTx};
use crate::error::{classify_db_code, AppResult, MOVEMENT_OPERATION_INDEX, SKU_UNIQUE_INDEX};

#[derive(Debug, Clone)]
struct OperationRow {
    endpoint: Option<String>,
    status: OperationStatus,
    response: Option<Value>,
}

#[derive(Debug, Clone)]
struct ReceiptLineRow {
    id: i64,
    receipt_id: i64,
    inventory_id: String,
    qty_received: i64,
    unit_cost: Decimal,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    items: BTreeMap<String, InventoryItem>,
    movements: Vec<Movement>,
    audit: Vec<NewAuditEntry>,
    receipts: BTreeMap<i64, Receipt>,
    receipt_lines: BTreeMap<i64, ReceiptLineRow>,
    logs: BTreeMap<String, LogEntry>,
    operations: HashMap<String, OperationRow>,
    next_movement_id: i64,
    next_receipt_id: i64,
    next_line_id: i64,
}

fn unique_violation(constraint: &str) -> crate::error::AppError {
    classify_db_code(
        "23505",
        Some(constraint),
        "duplicate key value violates unique constraint",
    )
}

fn foreign_key_violation(constraint: &str) -> crate::error::AppError {
    classify_db_code(
        "23503",
        Some(constraint),
        "violates foreign key constraint",
    )
}

fn check_violation(constraint: &str) -> crate::error::AppError {
    classify_db_code("23514", Some(constraint), "violates check constraint")
}

impl LedgerState {
    fn ensure_sku_free(&self, id: &str, sku: Option<&str>) -> AppResult<()> {
        let Some(sku) = sku else {
            return Ok(());
        };
        let key = sku_key(sku);
        let taken = self.items.values().any(|item| {
            item.id != id && item.sku.as_deref().map(sku_key).as_deref() == Some(key.as_str())
        });
        if taken {
            return Err(unique_violation(SKU_UNIQUE_INDEX));
        }
        Ok(())
    }

    fn receipt_item(&self, line: &ReceiptLineRow) -> ReceiptItem {
        let item = self.items.get(&line.inventory_id);
        ReceiptItem {
            id: line.id,
            receipt_id: line.receipt_id,
            inventory_id: line.inventory_id.clone(),
            qty_received: line.qty_received,
            unit_cost: line.unit_cost,
            line_total: Decimal::from(line.qty_received) * line.unit_cost,
            display_name: item
                .and_then(|i| i.name.clone().or_else(|| i.sku.clone()))
                .unwrap_or_else(|| line.inventory_id.clone()),
            sku: item.and_then(|i| i.sku.clone()).unwrap_or_default(),
        }
    }
}

fn apply_details(item: &mut InventoryItem, details: &ItemDetails) {
    if let Some(v) = &details.category {
        item.category = Some(v.clone());
    }
    if let Some(v) = &details.name {
        item.name = Some(v.clone());
    }
    if let Some(v) = &details.keyword {
        item.keyword = Some(v.clone());
    }
    if details.sku.is_some() {
        item.sku = normalize_sku(details.sku.as_deref());
    }
    if let Some(v) = details.price {
        item.price = v;
    }
    if let Some(v) = &details.location {
        item.location = Some(v.clone());
    }
    if let Some(v) = &details.status {
        item.status = Some(v.clone());
    }
    if let Some(v) = &details.notes {
        item.notes = Some(v.clone());
    }
    if let Some(v) = &details.metadata {
        item.metadata = v.clone();
    }
}

/// Ledger state kept in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an item holding `quantity` units at `cost`, recorded as an OPENING movement
    pub async fn seed_item(&self, id: &str, quantity: i64, cost: Decimal) -> AppResult<()> {
        let mut tx = self.begin().await?;
        tx.create_item_if_absent(id, &ItemDetails::default()).await?;
        tx.update_item(id, &ItemWrite::stock(quantity, cost)).await?;
        tx.insert_movement(&NewMovement {
            inventory_id: id.to_string(),
            qty_delta: quantity,
            reason: MovementReason::Opening,
            unit_cost: Some(cost),
            unit_cost_used: None,
            on_hand_after: quantity,
            avg_cost_after: cost,
            ref_type: MovementRef::Adjust,
            ref_id: "seed".to_string(),
            request_id: None,
            operation_id: format!("seed:{}", id),
        })
        .await?;
        tx.commit().await
    }

    /// Leave an IN_PROGRESS idempotency record behind, as a crashed writer would
    pub async fn seed_in_progress(&self, operation_id: &str) {
        self.state.lock().await.operations.insert(
            operation_id.to_string(),
            OperationRow {
                endpoint: None,
                status: OperationStatus::InProgress,
                response: None,
            },
        );
    }

    pub async fn item(&self, id: &str) -> Option<InventoryItem> {
        self.state.lock().await.items.get(id).cloned()
    }

    /// Every movement of one item, oldest first
    pub async fn movements_for(&self, id: &str) -> Vec<Movement> {
        self.state
            .lock()
            .await
            .movements
            .iter()
            .filter(|m| m.inventory_id == id)
            .cloned()
            .collect()
    }

    pub async fn movement_count(&self) -> usize {
        self.state.lock().await.movements.len()
    }

    pub async fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.state.lock().await.audit.clone()
    }

    pub async fn receipt_count(&self) -> usize {
        self.state.lock().await.receipts.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn begin_operation(
        &mut self,
        operation_id: &str,
        endpoint: &str,
    ) -> AppResult<OperationState> {
        match self.work.operations.get(operation_id) {
            None => {
                self.work.operations.insert(
                    operation_id.to_string(),
                    OperationRow {
                        endpoint: Some(endpoint.to_string()),
                        status: OperationStatus::InProgress,
                        response: None,
                    },
                );
                Ok(OperationState::New)
            }
            Some(OperationRow {
                endpoint,
                status: OperationStatus::Done,
                response: Some(response),
            }) => Ok(OperationState::Done {
                endpoint: endpoint.clone(),
                response: response.clone(),
            }),
            Some(_) => Ok(OperationState::InProgress),
        }
    }

    async fn complete_operation(&mut self, operation_id: &str, response: &Value) -> AppResult<()> {
        if let Some(row) = self.work.operations.get_mut(operation_id) {
            row.status = OperationStatus::Done;
            row.response = Some(response.clone());
        }
        Ok(())
    }

    async fn lock_item(&mut self, id: &str) -> AppResult<Option<InventoryItem>> {
        Ok(self.work.items.get(id).cloned())
    }

    async fn get_item(&mut self, id: &str) -> AppResult<Option<InventoryItem>> {
        Ok(self.work.items.get(id).cloned())
    }

    async fn create_item_if_absent(&mut self, id: &str, details: &ItemDetails) -> AppResult<bool> {
        if self.work.items.contains_key(id) {
            return Ok(false);
        }
        let sku = normalize_sku(details.sku.as_deref());
        self.work.ensure_sku_free(id, sku.as_deref())?;

        let mut item = InventoryItem {
            id: id.to_string(),
            category: None,
            name: None,
            keyword: None,
            sku: None,
            quantity: 0,
            cost: Decimal::ZERO,
            price: Decimal::ZERO,
            location: None,
            status: Some(STATUS_IN_STOCK.to_string()),
            notes: None,
            metadata: json!({}),
            updated_at: Utc::now(),
        };
        apply_details(&mut item, details);
        self.work.items.insert(id.to_string(), item);
        Ok(true)
    }

    async fn update_item(&mut self, id: &str, write: &ItemWrite) -> AppResult<InventoryItem> {
        let Some(mut item) = self.work.items.get(id).cloned() else {
            return Err(crate::error::AppError::not_found("Inventory item", id));
        };
        apply_details(&mut item, &write.details);
        self.work.ensure_sku_free(id, item.sku.as_deref())?;

        if let Some(quantity) = write.quantity {
            if quantity < 0 {
                return Err(check_violation("inventory_quantity_check"));
            }
            item.quantity = quantity;
        }
        if let Some(cost) = write.cost {
            item.cost = cost;
        }
        item.updated_at = Utc::now();

        self.work.items.insert(id.to_string(), item.clone());
        Ok(item)
    }

    async fn delete_item(&mut self, id: &str) -> AppResult<()> {
        if self
            .work
            .receipt_lines
            .values()
            .any(|line| line.inventory_id == id)
        {
            return Err(foreign_key_violation("inbound_receipt_items_inventory_id_fkey"));
        }
        self.work.items.remove(id);
        self.work.movements.retain(|m| m.inventory_id != id);
        Ok(())
    }

    async fn count_receipt_refs(&mut self, id: &str) -> AppResult<i64> {
        Ok(self
            .work
            .receipt_lines
            .values()
            .filter(|line| line.inventory_id == id)
            .count() as i64)
    }

    async fn list_items(&mut self, include_archived: bool) -> AppResult<Vec<InventoryItem>> {
        let mut items: Vec<InventoryItem> = self
            .work
            .items
            .values()
            .filter(|item| include_archived || !item.is_archived())
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            (a.category.as_deref(), a.name.as_deref(), a.id.as_str()).cmp(&(
                b.category.as_deref(),
                b.name.as_deref(),
                b.id.as_str(),
            ))
        });
        Ok(items)
    }

    async fn item_movements(&mut self, id: &str, limit: i64) -> AppResult<Vec<MovementView>> {
        let rows = self
            .work
            .movements
            .iter()
            .rev()
            .filter(|m| m.inventory_id == id)
            .map(|m| {
                let receipt = match m.ref_type.as_deref() {
                    Some("RECEIPT") => m
                        .ref_id
                        .as_deref()
                        .and_then(|r| r.parse::<i64>().ok())
                        .and_then(|rid| self.work.receipts.get(&rid)),
                    _ => None,
                };
                (
                    m.clone(),
                    receipt.and_then(|r| r.vendor.clone()),
                    receipt.map(|r| r.received_at),
                )
            })
            .collect();
        let mut views = with_previous_state(rows);
        views.truncate(limit.max(0) as usize);
        Ok(views)
    }

    async fn insert_movement(&mut self, movement: &NewMovement) -> AppResult<Movement> {
        if self
            .work
            .movements
            .iter()
            .any(|m| m.operation_id == movement.operation_id)
        {
            return Err(unique_violation(MOVEMENT_OPERATION_INDEX));
        }
        if !self.work.items.contains_key(&movement.inventory_id) {
            return Err(foreign_key_violation("inventory_movements_inventory_id_fkey"));
        }

        self.work.next_movement_id += 1;
        let row = Movement {
            id: self.work.next_movement_id,
            inventory_id: movement.inventory_id.clone(),
            qty_delta: movement.qty_delta,
            reason: movement.reason.as_str().to_string(),
            unit_cost: movement.unit_cost,
            unit_cost_used: movement.unit_cost_used,
            on_hand_after: movement.on_hand_after,
            avg_cost_after: movement.avg_cost_after,
            ref_type: Some(movement.ref_type.as_str().to_string()),
            ref_id: Some(movement.ref_id.clone()),
            request_id: movement.request_id.clone(),
            operation_id: movement.operation_id.clone(),
            occurred_at: Utc::now(),
        };
        self.work.movements.push(row.clone());
        Ok(row)
    }

    async fn insert_audit(&mut self, entry: &NewAuditEntry) -> AppResult<()> {
        self.work.audit.push(entry.clone());
        Ok(())
    }

    async fn insert_receipt(&mut self, receipt: &NewReceipt) -> AppResult<Receipt> {
        if self
            .work
            .receipts
            .values()
            .any(|r| r.operation_id == receipt.operation_id)
        {
            return Err(unique_violation("inbound_receipts_operation_id_key"));
        }
        self.work.next_receipt_id += 1;
        let row = Receipt {
            id: self.work.next_receipt_id,
            received_at: receipt.received_at,
            vendor: receipt.vendor.clone(),
            mode: receipt.mode.clone(),
            notes: receipt.notes.clone(),
            images: receipt.images.clone(),
            operation_id: receipt.operation_id.clone(),
            request_id: receipt.request_id.clone(),
            created_at: Utc::now(),
        };
        self.work.receipts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn receipt_by_operation(&mut self, operation_id: &str) -> AppResult<Option<Receipt>> {
        Ok(self
            .work
            .receipts
            .values()
            .find(|r| r.operation_id == operation_id)
            .cloned())
    }

    async fn get_receipt(&mut self, id: i64) -> AppResult<Option<Receipt>> {
        Ok(self.work.receipts.get(&id).cloned())
    }

    async fn lock_receipt(&mut self, id: i64) -> AppResult<Option<Receipt>> {
        Ok(self.work.receipts.get(&id).cloned())
    }

    async fn update_receipt_header(
        &mut self,
        id: i64,
        patch: &ReceiptHeaderPatch,
    ) -> AppResult<Receipt> {
        let Some(receipt) = self.work.receipts.get_mut(&id) else {
            return Err(crate::error::AppError::not_found("Receipt", id.to_string()));
        };
        if let Some(v) = patch.received_at {
            receipt.received_at = v;
        }
        if let Some(v) = &patch.vendor {
            receipt.vendor = v.clone();
        }
        if let Some(v) = &patch.mode {
            receipt.mode = v.clone();
        }
        if let Some(v) = &patch.notes {
            receipt.notes = v.clone();
        }
        if let Some(v) = &patch.images {
            receipt.images = v.clone();
        }
        Ok(receipt.clone())
    }

    async fn delete_receipt(&mut self, id: i64) -> AppResult<()> {
        self.work.receipts.remove(&id);
        self.work.receipt_lines.retain(|_, line| line.receipt_id != id);
        Ok(())
    }

    async fn list_receipts(&mut self, limit: i64) -> AppResult<Vec<ReceiptSummary>> {
        let mut receipts: Vec<&Receipt> = self.work.receipts.values().collect();
        receipts.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));

        Ok(receipts
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| ReceiptSummary {
                id: r.id,
                received_at: r.received_at,
                vendor: r.vendor.clone(),
                mode: r.mode.clone(),
                notes: r.notes.clone(),
                created_at: r.created_at,
                operation_id: r.operation_id.clone(),
                total_amount: self
                    .work
                    .receipt_lines
                    .values()
                    .filter(|line| line.receipt_id == r.id)
                    .map(|line| Decimal::from(line.qty_received) * line.unit_cost)
                    .sum(),
            })
            .collect())
    }

    async fn receipt_items(&mut self, receipt_id: i64) -> AppResult<Vec<ReceiptItem>> {
        Ok(self
            .work
            .receipt_lines
            .values()
            .filter(|line| line.receipt_id == receipt_id)
            .map(|line| self.work.receipt_item(line))
            .collect())
    }

    async fn insert_receipt_item(&mut self, item: &NewReceiptItem) -> AppResult<ReceiptItem> {
        if !self.work.receipts.contains_key(&item.receipt_id) {
            return Err(foreign_key_violation("inbound_receipt_items_receipt_id_fkey"));
        }
        if !self.work.items.contains_key(&item.inventory_id) {
            return Err(foreign_key_violation("inbound_receipt_items_inventory_id_fkey"));
        }
        if item.qty_received <= 0 {
            return Err(check_violation("inbound_receipt_items_qty_received_check"));
        }
        self.work.next_line_id += 1;
        let line = ReceiptLineRow {
            id: self.work.next_line_id,
            receipt_id: item.receipt_id,
            inventory_id: item.inventory_id.clone(),
            qty_received: item.qty_received,
            unit_cost: item.unit_cost,
        };
        let view = self.work.receipt_item(&line);
        self.work.receipt_lines.insert(line.id, line);
        Ok(view)
    }

    async fn update_receipt_item(
        &mut self,
        id: i64,
        qty_received: i64,
        unit_cost: Decimal,
    ) -> AppResult<()> {
        if qty_received <= 0 {
            return Err(check_violation("inbound_receipt_items_qty_received_check"));
        }
        if let Some(line) = self.work.receipt_lines.get_mut(&id) {
            line.qty_received = qty_received;
            line.unit_cost = unit_cost;
        }
        Ok(())
    }

    async fn delete_receipt_item(&mut self, id: i64) -> AppResult<()> {
        self.work.receipt_lines.remove(&id);
        Ok(())
    }

    async fn insert_log(&mut self, entry: &LogEntry) -> AppResult<LogEntry> {
        if self.work.logs.contains_key(&entry.id) {
            return Err(unique_violation("logs_pkey"));
        }
        self.work.logs.insert(entry.id.clone(), entry.clone());
        Ok(entry.clone())
    }

    async fn list_logs(&mut self, limit: i64) -> AppResult<Vec<LogEntry>> {
        let mut logs: Vec<LogEntry> = self.work.logs.values().cloned().collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
