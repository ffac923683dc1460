//! Ledger storage seam
//!
//! Services only talk to the store through [`LedgerStore`] and the
//! transaction handle it hands out. Every call on a [`LedgerTx`] runs inside
//! one transaction; dropping the handle without [`LedgerTx::commit`] rolls
//! everything back.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use shared::{
    InventoryItem, ItemDetails, ItemWrite, LogEntry, Movement, MovementView, NewAuditEntry,
    NewMovement, NewReceipt, NewReceiptItem, OperationState, Receipt, ReceiptHeaderPatch,
    ReceiptItem, ReceiptSummary,
};

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgLedgerStore;

/// Newest movements returned by the item history view
pub const MOVEMENT_HISTORY_LIMIT: i64 = 200;

/// Newest entries returned by the activity log view
pub const LOG_LIST_LIMIT: i64 = 200;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;

    /// Cheap liveness check
    async fn ping(&self) -> AppResult<()>;

    /// Short name reported by the health endpoint
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
pub trait LedgerTx: Send {
    // ------------------------------------------------------------------
    // Idempotency
    // ------------------------------------------------------------------

    /// Insert an IN_PROGRESS record for `operation_id` or report the existing one
    async fn begin_operation(
        &mut self,
        operation_id: &str,
        endpoint: &str,
    ) -> AppResult<OperationState>;

    /// Mark the operation DONE with the response to replay
    async fn complete_operation(&mut self, operation_id: &str, response: &Value) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Inventory items
    // ------------------------------------------------------------------

    /// Read an item under an exclusive row lock
    async fn lock_item(&mut self, id: &str) -> AppResult<Option<InventoryItem>>;

    /// Read an item without locking
    async fn get_item(&mut self, id: &str) -> AppResult<Option<InventoryItem>>;

    /// Create an empty item unless one already exists. Returns whether it was created.
    async fn create_item_if_absent(&mut self, id: &str, details: &ItemDetails) -> AppResult<bool>;

    /// Write the provided fields of an item
    async fn update_item(&mut self, id: &str, write: &ItemWrite) -> AppResult<InventoryItem>;

    async fn delete_item(&mut self, id: &str) -> AppResult<()>;

    /// Number of receipt lines referencing the item
    async fn count_receipt_refs(&mut self, id: &str) -> AppResult<i64>;

    async fn list_items(&mut self, include_archived: bool) -> AppResult<Vec<InventoryItem>>;

    /// Newest movements of one item with the state preceding each row
    async fn item_movements(&mut self, id: &str, limit: i64) -> AppResult<Vec<MovementView>>;

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    async fn insert_movement(&mut self, movement: &NewMovement) -> AppResult<Movement>;

    async fn insert_audit(&mut self, entry: &NewAuditEntry) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Receipts
    // ------------------------------------------------------------------

    async fn insert_receipt(&mut self, receipt: &NewReceipt) -> AppResult<Receipt>;

    async fn receipt_by_operation(&mut self, operation_id: &str) -> AppResult<Option<Receipt>>;

    /// Read a receipt header without locking
    async fn get_receipt(&mut self, id: i64) -> AppResult<Option<Receipt>>;

    /// Read a receipt header under an exclusive row lock
    async fn lock_receipt(&mut self, id: i64) -> AppResult<Option<Receipt>>;

    async fn update_receipt_header(
        &mut self,
        id: i64,
        patch: &ReceiptHeaderPatch,
    ) -> AppResult<Receipt>;

    async fn delete_receipt(&mut self, id: i64) -> AppResult<()>;

    async fn list_receipts(&mut self, limit: i64) -> AppResult<Vec<ReceiptSummary>>;

    /// Lines of a receipt ordered by line id
    async fn receipt_items(&mut self, receipt_id: i64) -> AppResult<Vec<ReceiptItem>>;

    async fn insert_receipt_item(&mut self, item: &NewReceiptItem) -> AppResult<ReceiptItem>;

    async fn update_receipt_item(
        &mut self,
        id: i64,
        qty_received: i64,
        unit_cost: Decimal,
    ) -> AppResult<()>;

    async fn delete_receipt_item(&mut self, id: i64) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    async fn insert_log(&mut self, entry: &LogEntry) -> AppResult<LogEntry>;

    async fn list_logs(&mut self, limit: i64) -> AppResult<Vec<LogEntry>>;

    /// Make every write of this transaction durable
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Attach the state preceding each movement.
///
/// `movements` must be ordered newest first; each row's previous cost is the
/// average after the next older row, or zero for the oldest one.
pub fn with_previous_state(
    movements: Vec<(Movement, Option<String>, Option<chrono::DateTime<chrono::Utc>>)>,
) -> Vec<MovementView> {
    let older_costs: Vec<Decimal> = movements
        .iter()
        .skip(1)
        .map(|(m, _, _)| m.avg_cost_after)
        .chain(std::iter::once(Decimal::ZERO))
        .collect();

    movements
        .into_iter()
        .zip(older_costs)
        .map(|((movement, vendor, receipt_received_at), prev_cost)| MovementView {
            prev_qty: movement.on_hand_after - movement.qty_delta,
            prev_cost,
            vendor,
            receipt_received_at,
            movement,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn movement(id: i64, qty_delta: i64, on_hand_after: i64, avg: Decimal) -> Movement {
        Movement {
            id,
            inventory_id: "I1".to_string(),
            qty_delta,
            reason: "RECEIVE".to_string(),
            unit_cost: None,
            unit_cost_used: None,
            on_hand_after,
            avg_cost_after: avg,
            ref_type: None,
            ref_id: None,
            request_id: None,
            operation_id: format!("op-{}", id),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_with_previous_state() {
        let views = with_previous_state(vec![
            (movement(2, 10, 20, Decimal::from(3)), None, None),
            (movement(1, 10, 10, Decimal::from(2)), Some("Newegg".to_string()), None),
        ]);
        assert_eq!(views[0].prev_qty, 10);
        assert_eq!(views[0].prev_cost, Decimal::from(2));
        assert_eq!(views[1].prev_qty, 0);
        assert_eq!(views[1].prev_cost, Decimal::ZERO);
        assert_eq!(views[1].vendor.as_deref(), Some("Newegg"));
    }
}
