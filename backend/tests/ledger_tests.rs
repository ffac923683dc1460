//! Ledger service tests
//!
//! Drives the inventory, receipt and log services against the in-memory store:
//! - at-most-once application per operation id
//! - weighted-average blending across receive/consume
//! - receipt edit/removal reconciliation
//! - failure paths leave the ledger untouched

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared::{
    BatchLine, BatchRequest, CreateReceiptInput, InventoryPatch, ItemDetails, ReceiptLineEdit,
    ReceiptLineInput, UpdateReceiptInput,
};
use stock_ledger::error::AppError;
use stock_ledger::services::{IdempotencyGuard, InventoryService, ReceiptService, RequestContext};
use stock_ledger::store::MemoryStore;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Helpers
// ============================================================================

struct Ledger {
    store: MemoryStore,
    inventory: InventoryService,
    receipts: ReceiptService,
}

fn ledger() -> Ledger {
    let store = MemoryStore::new();
    let guard = IdempotencyGuard::new(250);
    Ledger {
        inventory: InventoryService::new(Arc::new(store.clone()), guard),
        receipts: ReceiptService::new(Arc::new(store.clone()), guard),
        store,
    }
}

fn ctx() -> RequestContext {
    RequestContext::new("req-test", "/api/v1/test")
}

fn line(id: &str, qty_delta: i64, unit_cost: Option<Decimal>) -> BatchLine {
    BatchLine {
        id: Some(id.to_string()),
        qty_delta: Some(qty_delta),
        unit_cost,
        ..Default::default()
    }
}

fn batch(op: &str, items: Vec<BatchLine>) -> BatchRequest {
    BatchRequest {
        operation_id: Some(op.to_string()),
        items,
    }
}

fn receipt(op: &str, lines: &[(&str, i64, Decimal)]) -> CreateReceiptInput {
    CreateReceiptInput {
        operation_id: Some(op.to_string()),
        items: lines
            .iter()
            .map(|(id, qty, cost)| ReceiptLineInput {
                inventory_id: Some(id.to_string()),
                qty: Some(*qty),
                unit_cost: Some(*cost),
            })
            .collect(),
        ..Default::default()
    }
}

fn edit(op: &str, edits: Vec<ReceiptLineEdit>) -> UpdateReceiptInput {
    UpdateReceiptInput {
        operation_id: Some(op.to_string()),
        items: Some(edits),
        ..Default::default()
    }
}

// ============================================================================
// Batch application
// ============================================================================

#[tokio::test]
async fn test_batch_is_applied_at_most_once() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 10, dec!(5.00)).await);

    let request = batch("OP1", vec![line("I1", 5, Some(dec!(7.00)))]);
    let first = assert_ok!(l.inventory.apply_batch(&ctx(), request.clone()).await);
    let second = assert_ok!(l.inventory.apply_batch(&ctx(), request).await);

    assert_eq!(first, second);
    assert_eq!(first.updated_ids, vec!["I1".to_string()]);
    assert_eq!(first.inventory_updates[0].on_hand_qty, 15);
    assert_eq!(first.inventory_updates[0].avg_cost, dec!(5.6667));

    let item = l.store.item("I1").await.unwrap();
    assert_eq!(item.quantity, 15);
    assert_eq!(item.cost, dec!(5.6667));
    // opening movement plus exactly one receive
    assert_eq!(l.store.movements_for("I1").await.len(), 2);
}

#[tokio::test]
async fn test_blend_sequence() {
    let l = ledger();

    assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("B1", vec![line("X", 10, Some(dec!(2)))]))
            .await
    );
    let item = l.store.item("X").await.unwrap();
    assert_eq!((item.quantity, item.cost), (10, dec!(2)));

    assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("B2", vec![line("X", 10, Some(dec!(4)))]))
            .await
    );
    let item = l.store.item("X").await.unwrap();
    assert_eq!((item.quantity, item.cost), (20, dec!(3)));

    assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("B3", vec![line("X", -5, None)]))
            .await
    );
    let item = l.store.item("X").await.unwrap();
    assert_eq!((item.quantity, item.cost), (15, dec!(3)));

    let movements = l.store.movements_for("X").await;
    let consume = movements.last().unwrap();
    assert_eq!(consume.reason, "CONSUME");
    assert_eq!(consume.unit_cost_used, Some(dec!(3)));
    assert_eq!(consume.operation_id, "B3:X");
}

/// Both batches commit and apply their lines in ascending id order. The memory
/// store runs one transaction at a time, so this checks the lock ordering
/// contract (sorted `updatedIds`) rather than demonstrating deadlock freedom,
/// which needs concurrent row locks in Postgres.
#[tokio::test]
async fn test_opposite_order_batches_both_commit() {
    let l = ledger();
    assert_ok!(l.store.seed_item("A", 10, dec!(1)).await);
    assert_ok!(l.store.seed_item("B", 10, dec!(1)).await);

    let ab = batch("AB", vec![line("A", 1, Some(dec!(1))), line("B", 1, Some(dec!(1)))]);
    let ba = batch("BA", vec![line("B", 1, Some(dec!(1))), line("A", 1, Some(dec!(1)))]);

    let ctx = ctx();
    let (left, right) = tokio::join!(
        l.inventory.apply_batch(&ctx, ab),
        l.inventory.apply_batch(&ctx, ba)
    );
    let left = assert_ok!(left);
    let right = assert_ok!(right);

    // lines are applied in ascending id order regardless of submission order
    assert_eq!(left.updated_ids, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(right.updated_ids, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(l.store.item("A").await.unwrap().quantity, 12);
    assert_eq!(l.store.item("B").await.unwrap().quantity, 12);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_state_unchanged() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 3, dec!(2)).await);
    assert_ok!(l.store.seed_item("I2", 10, dec!(2)).await);
    let before = l.store.movement_count().await;

    // I1 would succeed on its own; I2 fails and takes the whole batch down
    let request = batch("OP-SHORT", vec![line("I1", 1, Some(dec!(2))), line("I2", -11, None)]);
    let err = assert_err!(l.inventory.apply_batch(&ctx(), request).await);

    assert!(matches!(
        err,
        AppError::InventoryInsufficient { ref inventory_id, available: 10, requested: 11 } if inventory_id == "I2"
    ));
    assert_eq!(err.status().as_u16(), 409);
    assert_eq!(l.store.item("I1").await.unwrap().quantity, 3);
    assert_eq!(l.store.item("I2").await.unwrap().quantity, 10);
    assert_eq!(l.store.movement_count().await, before);
}

#[tokio::test]
async fn test_failed_batch_can_be_retried_under_same_operation() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 1, dec!(2)).await);

    assert_err!(
        l.inventory
            .apply_batch(&ctx(), batch("OP-R", vec![line("I1", -2, None)]))
            .await
    );

    // the failed attempt left no idempotency record behind
    let result = assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("OP-R", vec![line("I1", -1, None)]))
            .await
    );
    assert_eq!(result.inventory_updates[0].on_hand_qty, 0);
}

#[tokio::test]
async fn test_in_progress_operation_is_retryable_conflict() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 10, dec!(5)).await);
    l.store.seed_in_progress("OP-BUSY").await;

    let err = assert_err!(
        l.inventory
            .apply_batch(&ctx(), batch("OP-BUSY", vec![line("I1", 1, Some(dec!(5)))]))
            .await
    );
    assert_eq!(err.code(), "OPERATION_IN_PROGRESS");
    assert_eq!(err.status().as_u16(), 409);
    assert!(err.retryable());
    assert_eq!(l.store.item("I1").await.unwrap().quantity, 10);
}

#[tokio::test]
async fn test_duplicate_sku_is_conflict() {
    let l = ledger();
    let with_sku = |id: &str, sku: &str| BatchLine {
        details: ItemDetails {
            sku: Some(sku.to_string()),
            ..Default::default()
        },
        ..line(id, 1, Some(dec!(1)))
    };

    assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("S1", vec![with_sku("A", "SKU-1")]))
            .await
    );
    let err = assert_err!(
        l.inventory
            .apply_batch(&ctx(), batch("S2", vec![with_sku("B", " sku-1 ")]))
            .await
    );
    assert_eq!(err.code(), "CONFLICT");
    assert!(l.store.item("B").await.is_none());
}

#[tokio::test]
async fn test_new_item_requires_unit_cost() {
    let l = ledger();
    let err = assert_err!(
        l.inventory
            .apply_batch(&ctx(), batch("N1", vec![line("NEW", 4, None)]))
            .await
    );
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

// ============================================================================
// Single-item adjust and removal
// ============================================================================

#[tokio::test]
async fn test_adjust_records_one_movement() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 10, dec!(5)).await);

    let patch = InventoryPatch {
        operation_id: Some("ADJ1".to_string()),
        quantity: Some(12),
        cost: Some(dec!(6)),
        ..Default::default()
    };
    let item = assert_ok!(l.inventory.adjust_item(&ctx(), "I1", patch).await);
    assert_eq!((item.quantity, item.cost), (12, dec!(6)));

    let history = assert_ok!(l.inventory.item_movements("I1").await);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].movement.reason, "ADJUST");
    assert_eq!(history[0].movement.qty_delta, 2);
    assert_eq!(history[0].prev_qty, 10);
    assert_eq!(history[0].prev_cost, dec!(5));
}

#[tokio::test]
async fn test_operation_id_reused_by_other_mutation_is_conflict() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 10, dec!(5)).await);
    assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("OPX", vec![line("I1", 1, Some(dec!(5)))]))
            .await
    );

    // same recorded endpoint, different response shape
    let patch = InventoryPatch {
        operation_id: Some("OPX".to_string()),
        quantity: Some(3),
        ..Default::default()
    };
    let err = assert_err!(l.inventory.adjust_item(&ctx(), "I1", patch.clone()).await);
    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(err.status().as_u16(), 409);

    // different recorded endpoint
    let elsewhere = RequestContext::new("req-test", "/api/v1/inventory/I1");
    let err = assert_err!(l.inventory.adjust_item(&elsewhere, "I1", patch).await);
    assert_eq!(err.code(), "CONFLICT");

    assert_eq!(l.store.item("I1").await.unwrap().quantity, 11);
}

#[tokio::test]
async fn test_adjust_missing_item_is_not_found() {
    let l = ledger();
    let patch = InventoryPatch {
        operation_id: Some("ADJ2".to_string()),
        quantity: Some(1),
        ..Default::default()
    };
    let err = assert_err!(l.inventory.adjust_item(&ctx(), "NOPE", patch).await);
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_remove_unreferenced_item_deletes_it() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 4, dec!(2)).await);

    let result = assert_ok!(l.inventory.remove_item(&ctx(), "I1", Some("DEL1")).await);
    assert!(!result.archived);
    assert!(l.store.item("I1").await.is_none());
}

#[tokio::test]
async fn test_remove_referenced_item_archives_and_writes_off() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 0, dec!(0)).await);
    assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R-ARCH", &[("I1", 6, dec!(3))]))
            .await
    );

    let result = assert_ok!(l.inventory.remove_item(&ctx(), "I1", Some("DEL2")).await);
    assert!(result.archived);
    assert_eq!(result.ref_count, 1);

    let item = l.store.item("I1").await.unwrap();
    assert!(item.is_archived());
    assert_eq!(item.quantity, 0);

    let last = l.store.movements_for("I1").await.pop().unwrap();
    assert_eq!(last.reason, "ADJUST");
    assert_eq!(last.qty_delta, -6);
    assert_eq!(last.on_hand_after, 0);

    let visible = assert_ok!(l.inventory.list_items(false).await);
    assert!(visible.iter().all(|i| i.id != "I1"));
    let all = assert_ok!(l.inventory.list_items(true).await);
    assert!(all.iter().any(|i| i.id == "I1"));
}

// ============================================================================
// Receipts
// ============================================================================

#[tokio::test]
async fn test_receipt_create_replay_writes_nothing_more() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 10, dec!(5)).await);

    let first = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R1", &[("I1", 10, dec!(7))]))
            .await
    );
    let movements = l.store.movement_count().await;
    let audits = l.store.audit_entries().await.len();

    let second = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R1", &[("I1", 10, dec!(7))]))
            .await
    );

    assert_eq!(first, second);
    assert_eq!(l.store.receipt_count().await, 1);
    assert_eq!(l.store.movement_count().await, movements);
    assert_eq!(l.store.audit_entries().await.len(), audits);
    assert_eq!(first.inventory_updates[0].on_hand_qty, 20);
    assert_eq!(first.inventory_updates[0].avg_cost, dec!(6));
    assert_eq!(first.receipt.mode, "MANUAL");
    assert_eq!(first.items[0].line_total, dec!(70));
}

#[tokio::test]
async fn test_receipt_for_missing_item_is_not_found() {
    let l = ledger();
    let err = assert_err!(
        l.receipts
            .create_receipt(&ctx(), receipt("R-MISSING", &[("GHOST", 1, dec!(1))]))
            .await
    );
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(l.store.receipt_count().await, 0);
}

#[tokio::test]
async fn test_receipt_line_removal_restores_item() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 10, dec!(5)).await);

    let created = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R2", &[("I1", 10, dec!(7))]))
            .await
    );
    let line_id = created.items[0].id;

    let edited = assert_ok!(
        l.receipts
            .update_receipt(
                &ctx(),
                created.receipt.id,
                edit(
                    "R2-EDIT",
                    vec![ReceiptLineEdit {
                        id: line_id,
                        remove: true,
                        ..Default::default()
                    }],
                ),
            )
            .await
    );

    assert!(edited.items.is_empty());
    let item = l.store.item("I1").await.unwrap();
    assert_eq!((item.quantity, item.cost), (10, dec!(5)));

    let last = l.store.movements_for("I1").await.pop().unwrap();
    assert_eq!(last.reason, "CONSUME");
    assert_eq!(last.qty_delta, -10);
    assert_eq!(last.operation_id, "R2-EDIT:delete:I1");
    assert!(l
        .store
        .audit_entries()
        .await
        .iter()
        .any(|a| a.entry_type == "RECEIPT_DELETE"));
}

#[tokio::test]
async fn test_receipt_line_edits_reconcile_stock() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 0, dec!(0)).await);

    let created = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R3", &[("I1", 10, dec!(4))]))
            .await
    );
    let receipt_id = created.receipt.id;
    let line_id = created.items[0].id;

    // quantity down by four
    assert_ok!(
        l.receipts
            .update_receipt(
                &ctx(),
                receipt_id,
                edit(
                    "R3-QTY",
                    vec![ReceiptLineEdit {
                        id: line_id,
                        qty_received: Some(6),
                        ..Default::default()
                    }],
                ),
            )
            .await
    );
    let item = l.store.item("I1").await.unwrap();
    assert_eq!((item.quantity, item.cost), (6, dec!(4)));

    // cost only: (6 * 4 + 1 * 6) / 6
    let detail = assert_ok!(
        l.receipts
            .update_receipt(
                &ctx(),
                receipt_id,
                edit(
                    "R3-COST",
                    vec![ReceiptLineEdit {
                        id: line_id,
                        unit_cost: Some(dec!(5)),
                        ..Default::default()
                    }],
                ),
            )
            .await
    );
    let item = l.store.item("I1").await.unwrap();
    assert_eq!((item.quantity, item.cost), (6, dec!(5)));
    assert_eq!(detail.items[0].qty_received, 6);
    assert_eq!(detail.items[0].unit_cost, dec!(5));

    // unchanged values write nothing
    let before = l.store.movement_count().await;
    assert_ok!(
        l.receipts
            .update_receipt(
                &ctx(),
                receipt_id,
                edit(
                    "R3-NOOP",
                    vec![ReceiptLineEdit {
                        id: line_id,
                        qty_received: Some(6),
                        unit_cost: Some(dec!(5)),
                        ..Default::default()
                    }],
                ),
            )
            .await
    );
    assert_eq!(l.store.movement_count().await, before);
}

#[tokio::test]
async fn test_receipt_edit_clears_vendor_and_notes() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 0, dec!(0)).await);
    let mut input = receipt("R-HDR", &[("I1", 1, dec!(1))]);
    input.header.vendor = Some(Some("Acme".to_string()));
    input.header.notes = Some(Some("dock 4".to_string()));
    let created = assert_ok!(l.receipts.create_receipt(&ctx(), input).await);
    assert_eq!(created.receipt.vendor.as_deref(), Some("Acme"));

    // fields left out stay as they are
    let mode_only: UpdateReceiptInput =
        serde_json::from_value(serde_json::json!({ "operationId": "R-HDR-1", "mode": "SCAN" }))
            .unwrap();
    let kept = assert_ok!(
        l.receipts
            .update_receipt(&ctx(), created.receipt.id, mode_only)
            .await
    );
    assert_eq!(kept.receipt.mode, "SCAN");
    assert_eq!(kept.receipt.vendor.as_deref(), Some("Acme"));
    assert_eq!(kept.receipt.notes.as_deref(), Some("dock 4"));

    // null and blank both clear
    let clear: UpdateReceiptInput = serde_json::from_value(serde_json::json!({
        "operationId": "R-HDR-2",
        "vendor": null,
        "notes": "   "
    }))
    .unwrap();
    let cleared = assert_ok!(
        l.receipts
            .update_receipt(&ctx(), created.receipt.id, clear)
            .await
    );
    assert_eq!(cleared.receipt.vendor, None);
    assert_eq!(cleared.receipt.notes, None);
    assert_eq!(cleared.receipt.mode, "SCAN");

    let stored = assert_ok!(l.receipts.get_receipt(created.receipt.id).await);
    assert_eq!(stored.receipt.vendor, None);
}

#[tokio::test]
async fn test_receipt_edit_unknown_line_is_invalid() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 0, dec!(0)).await);
    let created = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R4", &[("I1", 2, dec!(1))]))
            .await
    );

    let err = assert_err!(
        l.receipts
            .update_receipt(
                &ctx(),
                created.receipt.id,
                edit(
                    "R4-EDIT",
                    vec![ReceiptLineEdit {
                        id: 9999,
                        remove: true,
                        ..Default::default()
                    }],
                ),
            )
            .await
    );
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_receipt_removal_blocked_when_stock_consumed() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 0, dec!(0)).await);
    let created = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R5", &[("I1", 5, dec!(2))]))
            .await
    );
    assert_ok!(
        l.inventory
            .apply_batch(&ctx(), batch("USE", vec![line("I1", -3, None)]))
            .await
    );

    let err = assert_err!(
        l.receipts
            .delete_receipt(&ctx(), created.receipt.id, Some("R5-DEL"))
            .await
    );
    assert_eq!(err.code(), "INVENTORY_INSUFFICIENT");
    assert_eq!(l.store.receipt_count().await, 1);
    assert_eq!(l.store.item("I1").await.unwrap().quantity, 2);
}

#[tokio::test]
async fn test_delete_receipt_restores_every_line() {
    let l = ledger();
    assert_ok!(l.store.seed_item("A", 4, dec!(1)).await);
    assert_ok!(l.store.seed_item("B", 0, dec!(0)).await);

    let created = assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R6", &[("B", 3, dec!(9)), ("A", 4, dec!(3))]))
            .await
    );
    assert_eq!(l.store.item("A").await.unwrap().cost, dec!(2));

    let result = assert_ok!(
        l.receipts
            .delete_receipt(&ctx(), created.receipt.id, Some("R6-DEL"))
            .await
    );
    assert!(result.success);
    assert_eq!(result.inventory_updates.len(), 2);
    assert_eq!(l.store.receipt_count().await, 0);

    let a = l.store.item("A").await.unwrap();
    assert_eq!((a.quantity, a.cost), (4, dec!(1)));
    let b = l.store.item("B").await.unwrap();
    assert_eq!((b.quantity, b.cost), (0, dec!(0)));

    let err = assert_err!(l.receipts.get_receipt(created.receipt.id).await);
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_list_receipts_reports_totals() {
    let l = ledger();
    assert_ok!(l.store.seed_item("I1", 0, dec!(0)).await);
    assert_ok!(
        l.receipts
            .create_receipt(&ctx(), receipt("R7", &[("I1", 3, dec!(2.5))]))
            .await
    );

    let receipts = assert_ok!(l.receipts.list_receipts(None).await);
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].total_amount, dec!(7.5));
}
