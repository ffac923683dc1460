//! Receipt reconciliation service
//!
//! Creating a receipt receives stock; editing or deleting it later applies
//! only the difference through the cost engine, so the item ends up where it
//! would have been had the receipt been entered correctly in the first place.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{
    apply_movement, clamp_list_limit, edit_receipt_line, find_duplicate, normalize_inventory_id,
    reverse_receipt_line, round_cost, validate_received_qty, validate_unit_cost,
    CreateReceiptInput, InventoryItem, InventoryUpdate, ItemWrite, MovementReason, MovementRef,
    NewAuditEntry, NewMovement, NewReceipt, NewReceiptItem, OperationId, Receipt, ReceiptDetail,
    ReceiptHeaderPatch, ReceiptItem, ReceiptLineEdit, ReceiptSummary, RemoveReceiptResult,
    StockState, UpdateReceiptInput, AUDIT_RECEIPT_DELETE, AUDIT_RECEIPT_EDIT,
    DEFAULT_RECEIPT_MODE,
};
use validator::Validate;

use super::{require_operation_id, trace_outcome, Admission, IdempotencyGuard, RequestContext};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx};

/// Receipt service for goods-received events
#[derive(Clone)]
pub struct ReceiptService {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
}

/// Receipt line after validation
#[derive(Debug, Clone)]
struct ReceiveLine {
    inventory_id: String,
    qty: i64,
    unit_cost: Decimal,
}

/// Requested change to an existing line
#[derive(Debug, Clone)]
enum LineChange {
    Remove,
    Set { qty: i64, unit_cost: Decimal },
}

fn stock_of(item: &InventoryItem) -> StockState {
    StockState::new(item.quantity, item.cost)
}

fn validate_header(header: ReceiptHeaderPatch) -> AppResult<ReceiptHeaderPatch> {
    let header = header.normalized();
    header.validate()?;
    Ok(header)
}

impl ReceiptService {
    pub fn new(store: Arc<dyn LedgerStore>, guard: IdempotencyGuard) -> Self {
        Self { store, guard }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn list_receipts(&self, limit: Option<i64>) -> AppResult<Vec<ReceiptSummary>> {
        let mut tx = self.store.begin().await?;
        let receipts = tx.list_receipts(clamp_list_limit(limit)).await?;
        tx.commit().await?;
        Ok(receipts)
    }

    /// Receipt with its lines and the current state of the items it touched
    pub async fn get_receipt(&self, id: i64) -> AppResult<ReceiptDetail> {
        let mut tx = self.store.begin().await?;
        let receipt = tx
            .get_receipt(id)
            .await?
            .ok_or_else(|| AppError::not_found("Receipt", id.to_string()))?;
        let detail = current_detail(tx.as_mut(), receipt).await?;
        tx.commit().await?;
        Ok(detail)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Record a goods-received event and receive every line into stock
    pub async fn create_receipt(
        &self,
        ctx: &RequestContext,
        input: CreateReceiptInput,
    ) -> AppResult<ReceiptDetail> {
        let operation_id = require_operation_id(input.operation_id.as_deref())?;
        let header = validate_header(input.header)?;
        let lines = prepare_lines(input.items)?;

        tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            lines = lines.len(),
            "receipt.create.start"
        );

        let result = self.create_in_tx(ctx, &operation_id, header, lines).await;
        trace_outcome("receipt.create.finish", ctx, &operation_id, &result);
        result
    }

    async fn create_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        header: ReceiptHeaderPatch,
        lines: Vec<ReceiveLine>,
    ) -> AppResult<ReceiptDetail> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(detail) = self
            .guard
            .admit::<ReceiptDetail>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(detail);
        }

        // A receipt already written under this operation id is the authoritative effect
        if let Some(existing) = tx.receipt_by_operation(operation_id.as_str()).await? {
            tracing::info!(
                request_id = %ctx.request_id,
                operation_id = %operation_id,
                receipt_id = existing.id,
                "receipt.create.replayed"
            );
            let detail = current_detail(tx.as_mut(), existing).await?;
            self.guard
                .complete(tx.as_mut(), operation_id, &detail)
                .await?;
            tx.commit().await?;
            return Ok(detail);
        }

        let receipt = tx
            .insert_receipt(&NewReceipt {
                received_at: header.received_at.unwrap_or_else(Utc::now),
                vendor: header.vendor.flatten(),
                mode: header
                    .mode
                    .unwrap_or_else(|| DEFAULT_RECEIPT_MODE.to_string()),
                notes: header.notes.flatten(),
                images: header.images.unwrap_or_default(),
                operation_id: operation_id.to_string(),
                request_id: Some(ctx.request_id.clone()),
            })
            .await?;

        let mut inventory_updates = Vec::with_capacity(lines.len());
        for line in lines {
            let item = tx
                .lock_item(&line.inventory_id)
                .await?
                .ok_or_else(|| AppError::not_found("Inventory item", line.inventory_id.clone()))?;

            let outcome = apply_movement(
                stock_of(&item),
                line.qty,
                Some(line.unit_cost),
                MovementReason::Receive,
            )
            .map_err(|e| AppError::from_cost(&line.inventory_id, e))?;

            tx.update_item(
                &line.inventory_id,
                &ItemWrite::stock(outcome.quantity, outcome.avg_cost),
            )
            .await?;
            tx.insert_receipt_item(&NewReceiptItem {
                receipt_id: receipt.id,
                inventory_id: line.inventory_id.clone(),
                qty_received: line.qty,
                unit_cost: line.unit_cost,
            })
            .await?;
            tx.insert_movement(&NewMovement {
                inventory_id: line.inventory_id.clone(),
                qty_delta: line.qty,
                reason: MovementReason::Receive,
                unit_cost: Some(line.unit_cost),
                unit_cost_used: None,
                on_hand_after: outcome.quantity,
                avg_cost_after: outcome.avg_cost,
                ref_type: MovementRef::Receipt,
                ref_id: receipt.id.to_string(),
                request_id: Some(ctx.request_id.clone()),
                operation_id: operation_id.for_item(&line.inventory_id),
            })
            .await?;
            tx.insert_audit(&NewAuditEntry::valued(
                item.sku.as_deref(),
                item.name.as_deref(),
                MovementReason::Receive.as_str(),
                line.qty,
                line.unit_cost,
                receipt.id.to_string(),
            ))
            .await?;

            inventory_updates.push(InventoryUpdate {
                inventory_id: line.inventory_id,
                on_hand_qty: outcome.quantity,
                avg_cost: outcome.avg_cost,
            });
        }

        let items = tx.receipt_items(receipt.id).await?;
        let detail = ReceiptDetail {
            receipt,
            items,
            inventory_updates,
        };

        self.guard
            .complete(tx.as_mut(), operation_id, &detail)
            .await?;
        tx.commit().await?;
        Ok(detail)
    }

    // ========================================================================
    // Edit
    // ========================================================================

    /// Edit header fields and reconcile line changes against stock
    pub async fn update_receipt(
        &self,
        ctx: &RequestContext,
        id: i64,
        input: UpdateReceiptInput,
    ) -> AppResult<ReceiptDetail> {
        let operation_id = require_operation_id(input.operation_id.as_deref())?;
        let header = validate_header(input.header)?;
        let edits = prepare_edits(input.items.unwrap_or_default())?;

        tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            receipt_id = id,
            lines = edits.len(),
            "receipt.update.start"
        );

        let result = self.update_in_tx(ctx, &operation_id, id, header, edits).await;
        trace_outcome("receipt.update.finish", ctx, &operation_id, &result);
        result
    }

    async fn update_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        id: i64,
        header: ReceiptHeaderPatch,
        edits: Vec<(usize, ReceiptLineEdit)>,
    ) -> AppResult<ReceiptDetail> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(detail) = self
            .guard
            .admit::<ReceiptDetail>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(detail);
        }

        let receipt = tx
            .lock_receipt(id)
            .await?
            .ok_or_else(|| AppError::not_found("Receipt", id.to_string()))?;

        let existing: HashMap<i64, ReceiptItem> = tx
            .receipt_items(receipt.id)
            .await?
            .into_iter()
            .map(|line| (line.id, line))
            .collect();

        let mut changes = Vec::with_capacity(edits.len());
        for (index, edit) in edits {
            let line = existing.get(&edit.id).cloned().ok_or_else(|| AppError::InvalidArgument {
                field: Some(format!("items[{}].id", index)),
                message: "Receipt item not found".to_string(),
                details: Some(serde_json::json!({ "itemId": edit.id })),
            })?;
            let change = if edit.remove {
                LineChange::Remove
            } else {
                LineChange::Set {
                    qty: edit.qty_received.unwrap_or(line.qty_received),
                    unit_cost: edit.unit_cost.unwrap_or(line.unit_cost),
                }
            };
            changes.push((line, change));
        }
        changes.sort_by(|(a, _), (b, _)| a.inventory_id.cmp(&b.inventory_id).then(a.id.cmp(&b.id)));

        let mut inventory_updates = Vec::new();
        for (line, change) in changes {
            let update = match change {
                LineChange::Remove => {
                    Some(remove_line(tx.as_mut(), ctx, operation_id, &receipt, &line).await?)
                }
                LineChange::Set { qty, unit_cost } => {
                    edit_line(tx.as_mut(), ctx, operation_id, &receipt, &line, qty, unit_cost)
                        .await?
                }
            };
            inventory_updates.extend(update);
        }

        let receipt = if header.is_empty() {
            receipt
        } else {
            tx.update_receipt_header(receipt.id, &header).await?
        };

        let items = tx.receipt_items(receipt.id).await?;
        let detail = ReceiptDetail {
            receipt,
            items,
            inventory_updates,
        };

        self.guard
            .complete(tx.as_mut(), operation_id, &detail)
            .await?;
        tx.commit().await?;
        Ok(detail)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove every line exactly as an edit with `remove: true` would, then the header
    pub async fn delete_receipt(
        &self,
        ctx: &RequestContext,
        id: i64,
        operation_id: Option<&str>,
    ) -> AppResult<RemoveReceiptResult> {
        let operation_id = require_operation_id(operation_id)?;

        tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            receipt_id = id,
            "receipt.delete.start"
        );

        let result = self.delete_in_tx(ctx, &operation_id, id).await;
        trace_outcome("receipt.delete.finish", ctx, &operation_id, &result);
        result
    }

    async fn delete_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        id: i64,
    ) -> AppResult<RemoveReceiptResult> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(result) = self
            .guard
            .admit::<RemoveReceiptResult>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(result);
        }

        let receipt = tx
            .lock_receipt(id)
            .await?
            .ok_or_else(|| AppError::not_found("Receipt", id.to_string()))?;

        let mut lines = tx.receipt_items(receipt.id).await?;
        lines.sort_by(|a, b| a.inventory_id.cmp(&b.inventory_id).then(a.id.cmp(&b.id)));

        let mut inventory_updates = Vec::with_capacity(lines.len());
        for line in &lines {
            inventory_updates.push(remove_line(tx.as_mut(), ctx, operation_id, &receipt, line).await?);
        }
        tx.delete_receipt(receipt.id).await?;

        let result = RemoveReceiptResult {
            success: true,
            receipt_id: receipt.id,
            inventory_updates,
        };

        self.guard
            .complete(tx.as_mut(), operation_id, &result)
            .await?;
        tx.commit().await?;
        Ok(result)
    }
}

/// Validate new receipt lines and order them for locking
fn prepare_lines(items: Vec<shared::ReceiptLineInput>) -> AppResult<Vec<ReceiveLine>> {
    if items.is_empty() {
        return Err(AppError::invalid("items", "At least one receipt line is required"));
    }

    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let field = |name: &str| format!("items[{}].{}", index, name);

        let inventory_id = normalize_inventory_id(item.inventory_id.as_deref())
            .map_err(|m| AppError::invalid(field("inventoryId"), m))?;
        let qty = item
            .qty
            .ok_or_else(|| AppError::invalid(field("qty"), "qty is required"))?;
        validate_received_qty(qty).map_err(|m| AppError::invalid(field("qty"), m))?;
        let unit_cost = item
            .unit_cost
            .ok_or_else(|| AppError::invalid(field("unitCost"), "unitCost is required"))?;
        validate_unit_cost(unit_cost).map_err(|m| AppError::invalid(field("unitCost"), m))?;

        lines.push(ReceiveLine {
            inventory_id,
            qty,
            unit_cost: round_cost(unit_cost),
        });
    }

    if let Some(dup) = find_duplicate(lines.iter().map(|l| l.inventory_id.as_str())) {
        return Err(AppError::InvalidArgument {
            field: Some("items".to_string()),
            message: format!("Duplicate inventory id {} in receipt", dup),
            details: Some(serde_json::json!({ "inventoryId": dup })),
        });
    }

    lines.sort_by(|a, b| a.inventory_id.cmp(&b.inventory_id));
    Ok(lines)
}

/// Validate line edits before the transaction begins
fn prepare_edits(edits: Vec<ReceiptLineEdit>) -> AppResult<Vec<(usize, ReceiptLineEdit)>> {
    let mut seen = BTreeSet::new();
    let mut prepared = Vec::with_capacity(edits.len());

    for (index, mut edit) in edits.into_iter().enumerate() {
        if !seen.insert(edit.id) {
            return Err(AppError::invalid(
                format!("items[{}].id", index),
                format!("Receipt item {} appears more than once", edit.id),
            ));
        }
        if !edit.remove {
            if let Some(qty) = edit.qty_received {
                validate_received_qty(qty)
                    .map_err(|m| AppError::invalid(format!("items[{}].qtyReceived", index), m))?;
            }
            if let Some(cost) = edit.unit_cost {
                validate_unit_cost(cost)
                    .map_err(|m| AppError::invalid(format!("items[{}].unitCost", index), m))?;
                edit.unit_cost = Some(round_cost(cost));
            }
        }
        prepared.push((index, edit));
    }

    Ok(prepared)
}

async fn current_detail(tx: &mut dyn LedgerTx, receipt: Receipt) -> AppResult<ReceiptDetail> {
    let items = tx.receipt_items(receipt.id).await?;
    let ids: BTreeSet<&str> = items.iter().map(|i| i.inventory_id.as_str()).collect();

    let mut inventory_updates = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = tx.get_item(id).await? {
            inventory_updates.push(InventoryUpdate {
                inventory_id: item.id,
                on_hand_qty: item.quantity,
                avg_cost: item.cost,
            });
        }
    }

    Ok(ReceiptDetail {
        receipt,
        items,
        inventory_updates,
    })
}

/// Take back everything one line contributed and delete the line
async fn remove_line(
    tx: &mut dyn LedgerTx,
    ctx: &RequestContext,
    operation_id: &OperationId,
    receipt: &Receipt,
    line: &ReceiptItem,
) -> AppResult<InventoryUpdate> {
    let item = tx
        .lock_item(&line.inventory_id)
        .await?
        .ok_or_else(|| AppError::not_found("Inventory item", line.inventory_id.clone()))?;

    let outcome = reverse_receipt_line(stock_of(&item), line.qty_received, line.unit_cost)
        .map_err(|e| AppError::from_cost(&line.inventory_id, e))?;
    let qty_delta = -line.qty_received;

    tx.update_item(
        &line.inventory_id,
        &ItemWrite::stock(outcome.quantity, outcome.avg_cost),
    )
    .await?;
    tx.delete_receipt_item(line.id).await?;
    tx.insert_movement(&NewMovement {
        inventory_id: line.inventory_id.clone(),
        qty_delta,
        reason: MovementReason::Consume,
        unit_cost: None,
        unit_cost_used: outcome.unit_cost_used,
        on_hand_after: outcome.quantity,
        avg_cost_after: outcome.avg_cost,
        ref_type: MovementRef::Receipt,
        ref_id: receipt.id.to_string(),
        request_id: Some(ctx.request_id.clone()),
        operation_id: operation_id.for_item_action("delete", &line.inventory_id),
    })
    .await?;
    tx.insert_audit(&NewAuditEntry::valued(
        item.sku.as_deref(),
        item.name.as_deref(),
        AUDIT_RECEIPT_DELETE,
        qty_delta,
        item.cost,
        receipt.id.to_string(),
    ))
    .await?;

    tracing::debug!(
        request_id = %ctx.request_id,
        inventory_id = %line.inventory_id,
        receipt_id = receipt.id,
        action = "remove",
        delta = qty_delta,
        "receipt.line"
    );

    Ok(InventoryUpdate {
        inventory_id: line.inventory_id.clone(),
        on_hand_qty: outcome.quantity,
        avg_cost: outcome.avg_cost,
    })
}

/// Apply the difference between a line's stored and requested quantity/cost
async fn edit_line(
    tx: &mut dyn LedgerTx,
    ctx: &RequestContext,
    operation_id: &OperationId,
    receipt: &Receipt,
    line: &ReceiptItem,
    new_qty: i64,
    new_cost: Decimal,
) -> AppResult<Option<InventoryUpdate>> {
    if new_qty == line.qty_received && new_cost == line.unit_cost {
        return Ok(None);
    }

    let item = tx
        .lock_item(&line.inventory_id)
        .await?
        .ok_or_else(|| AppError::not_found("Inventory item", line.inventory_id.clone()))?;

    let Some(edit) = edit_receipt_line(
        stock_of(&item),
        line.qty_received,
        line.unit_cost,
        new_qty,
        new_cost,
    )
    .map_err(|e| AppError::from_cost(&line.inventory_id, e))?
    else {
        return Ok(None);
    };

    let outcome = edit.outcome;
    tx.update_item(
        &line.inventory_id,
        &ItemWrite::stock(outcome.quantity, outcome.avg_cost),
    )
    .await?;
    tx.update_receipt_item(line.id, new_qty, new_cost).await?;

    let unit_cost = match edit.reason {
        MovementReason::Consume => None,
        _ => Some(new_cost),
    };
    tx.insert_movement(&NewMovement {
        inventory_id: line.inventory_id.clone(),
        qty_delta: edit.qty_delta,
        reason: edit.reason,
        unit_cost,
        unit_cost_used: outcome.unit_cost_used,
        on_hand_after: outcome.quantity,
        avg_cost_after: outcome.avg_cost,
        ref_type: MovementRef::Receipt,
        ref_id: receipt.id.to_string(),
        request_id: Some(ctx.request_id.clone()),
        operation_id: operation_id.for_item_action("edit", &line.inventory_id),
    })
    .await?;
    tx.insert_audit(&NewAuditEntry::valued(
        item.sku.as_deref(),
        item.name.as_deref(),
        AUDIT_RECEIPT_EDIT,
        edit.qty_delta,
        new_cost,
        receipt.id.to_string(),
    ))
    .await?;

    tracing::debug!(
        request_id = %ctx.request_id,
        inventory_id = %line.inventory_id,
        receipt_id = receipt.id,
        action = edit.reason.as_str(),
        delta = edit.qty_delta,
        cost_delta = %edit.cost_delta,
        "receipt.line"
    );

    Ok(Some(InventoryUpdate {
        inventory_id: line.inventory_id.clone(),
        on_hand_qty: outcome.quantity,
        avg_cost: outcome.avg_cost,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ReceiptLineInput;

    fn input(id: &str, qty: i64, cost: i64) -> ReceiptLineInput {
        ReceiptLineInput {
            inventory_id: Some(id.to_string()),
            qty: Some(qty),
            unit_cost: Some(Decimal::from(cost)),
        }
    }

    #[test]
    fn test_prepare_lines_sorts_by_inventory_id() {
        let lines = prepare_lines(vec![input("B", 1, 1), input("A", 2, 3)]).unwrap();
        assert_eq!(lines[0].inventory_id, "A");
        assert_eq!(lines[1].inventory_id, "B");
    }

    #[test]
    fn test_prepare_lines_rejects_bad_input() {
        assert!(prepare_lines(vec![]).is_err());
        assert!(prepare_lines(vec![input("A", 0, 1)]).is_err());
        assert!(prepare_lines(vec![input("A", 1, -1)]).is_err());
        assert!(prepare_lines(vec![input("A", 1, 1), input("A", 2, 1)]).is_err());

        let missing_cost = ReceiptLineInput {
            unit_cost: None,
            ..input("A", 1, 1)
        };
        let err = prepare_lines(vec![missing_cost]).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidArgument { field: Some(ref f), .. } if f == "items[0].unitCost"
        ));
    }

    #[test]
    fn test_prepare_edits_rejects_repeated_line() {
        let edit = |id| ReceiptLineEdit {
            id,
            ..Default::default()
        };
        assert!(prepare_edits(vec![edit(1), edit(2)]).is_ok());
        assert!(prepare_edits(vec![edit(1), edit(1)]).is_err());
    }

    #[test]
    fn test_prepare_edits_skips_value_checks_on_remove() {
        let remove = ReceiptLineEdit {
            id: 1,
            remove: true,
            qty_received: Some(0),
            unit_cost: None,
        };
        assert!(prepare_edits(vec![remove]).is_ok());

        let bad = ReceiptLineEdit {
            id: 2,
            remove: false,
            qty_received: Some(0),
            unit_cost: None,
        };
        assert!(prepare_edits(vec![bad]).is_err());
    }
}
