//! Inventory mutation service
//!
//! Single-item adjust, batch apply and archive/delete. Each call is one
//! transaction: row lock, cost engine, item write, movement, audit entry and
//! idempotency completion commit together or not at all.

use std::sync::Arc;

use rust_decimal::Decimal;
use shared::{
    apply_movement, find_duplicate, normalize_inventory_id, round_cost, validate_quantity,
    validate_quantity_delta, validate_reason_sign, validate_unit_cost, BatchRequest, BatchResult,
    InventoryItem, InventoryPatch, InventoryUpdate, ItemDetails, ItemWrite, MovementReason,
    MovementRef, MovementView, NewAuditEntry, NewMovement, OperationId, RemoveItemResult,
    StockState, STATUS_ARCHIVED,
};

use super::{require_operation_id, trace_outcome, Admission, IdempotencyGuard, RequestContext};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx, MOVEMENT_HISTORY_LIMIT};

/// Inventory service for stock mutations and item reads
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
}

/// Batch line after validation
#[derive(Debug, Clone)]
struct PreparedLine {
    index: usize,
    id: String,
    qty_delta: i64,
    reason: MovementReason,
    unit_cost: Option<Decimal>,
    operator: Option<String>,
    details: ItemDetails,
}

fn stock_of(item: &InventoryItem) -> StockState {
    StockState::new(item.quantity, item.cost)
}

fn update_of(item: &InventoryItem) -> InventoryUpdate {
    InventoryUpdate {
        inventory_id: item.id.clone(),
        on_hand_qty: item.quantity,
        avg_cost: item.cost,
    }
}

fn validate_details(details: &ItemDetails, field_prefix: &str) -> AppResult<()> {
    if let Some(price) = details.price {
        validate_unit_cost(price)
            .map_err(|m| AppError::invalid(format!("{}price", field_prefix), m))?;
    }
    Ok(())
}

impl InventoryService {
    pub fn new(store: Arc<dyn LedgerStore>, guard: IdempotencyGuard) -> Self {
        Self { store, guard }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// List items, hiding archived ones unless asked
    pub async fn list_items(&self, include_archived: bool) -> AppResult<Vec<InventoryItem>> {
        let mut tx = self.store.begin().await?;
        let items = tx.list_items(include_archived).await?;
        tx.commit().await?;
        Ok(items)
    }

    /// Movement history of one item, newest first
    pub async fn item_movements(&self, id: &str) -> AppResult<Vec<MovementView>> {
        let id = normalize_inventory_id(Some(id)).map_err(|m| AppError::invalid("id", m))?;

        let mut tx = self.store.begin().await?;
        if tx.get_item(&id).await?.is_none() {
            return Err(AppError::not_found("Inventory item", id));
        }
        let movements = tx.item_movements(&id, MOVEMENT_HISTORY_LIMIT).await?;
        tx.commit().await?;
        Ok(movements)
    }

    // ========================================================================
    // Single-item adjust
    // ========================================================================

    /// Set an item's quantity and/or cost outright, plus any descriptive fields.
    ///
    /// A quantity or cost change is recorded as one ADJUST movement.
    pub async fn adjust_item(
        &self,
        ctx: &RequestContext,
        id: &str,
        patch: InventoryPatch,
    ) -> AppResult<InventoryItem> {
        let operation_id = require_operation_id(patch.operation_id.as_deref())?;
        let id = normalize_inventory_id(Some(id)).map_err(|m| AppError::invalid("id", m))?;
        if let Some(quantity) = patch.quantity {
            validate_quantity(quantity).map_err(|m| AppError::invalid("quantity", m))?;
        }
        if let Some(cost) = patch.cost {
            validate_unit_cost(cost).map_err(|m| AppError::invalid("cost", m))?;
        }
        validate_details(&patch.details, "")?;

        tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            inventory_id = %id,
            "inventory.adjust.start"
        );

        let result = self.adjust_in_tx(ctx, &operation_id, &id, patch).await;
        trace_outcome("inventory.adjust.finish", ctx, &operation_id, &result);
        result
    }

    async fn adjust_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        id: &str,
        patch: InventoryPatch,
    ) -> AppResult<InventoryItem> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(item) = self
            .guard
            .admit::<InventoryItem>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(item);
        }

        let item = tx
            .lock_item(id)
            .await?
            .ok_or_else(|| AppError::not_found("Inventory item", id))?;

        let qty_delta = patch.quantity.map_or(0, |q| q - item.quantity);
        let new_cost = patch.cost.map(round_cost).filter(|c| *c != item.cost);

        let write = if qty_delta != 0 || new_cost.is_some() {
            let outcome = apply_movement(stock_of(&item), qty_delta, new_cost, MovementReason::Adjust)
                .map_err(|e| AppError::from_cost(id, e))?;

            tx.insert_movement(&NewMovement {
                inventory_id: id.to_string(),
                qty_delta,
                reason: MovementReason::Adjust,
                unit_cost: new_cost,
                unit_cost_used: None,
                on_hand_after: outcome.quantity,
                avg_cost_after: outcome.avg_cost,
                ref_type: MovementRef::Adjust,
                ref_id: operation_id.to_string(),
                request_id: Some(ctx.request_id.clone()),
                operation_id: operation_id.for_item(id),
            })
            .await?;

            tx.insert_audit(
                &NewAuditEntry::valued(
                    item.sku.as_deref(),
                    item.name.as_deref(),
                    MovementReason::Adjust.as_str(),
                    qty_delta,
                    outcome.avg_cost,
                    operation_id.as_str(),
                )
                .with_operator(patch.operator.clone()),
            )
            .await?;

            tracing::debug!(
                request_id = %ctx.request_id,
                inventory_id = %id,
                action = "adjust",
                delta = qty_delta,
                avg_cost = %outcome.avg_cost,
                "inventory.movement"
            );

            ItemWrite {
                details: patch.details,
                quantity: Some(outcome.quantity),
                cost: Some(outcome.avg_cost),
            }
        } else {
            ItemWrite::details(patch.details)
        };

        let updated = tx.update_item(id, &write).await?;

        self.guard
            .complete(tx.as_mut(), operation_id, &updated)
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    // ========================================================================
    // Batch apply
    // ========================================================================

    /// Apply signed quantity changes to many items as one unit.
    ///
    /// Lines are processed in ascending id order so that concurrent batches
    /// over overlapping items always lock rows in the same order.
    pub async fn apply_batch(
        &self,
        ctx: &RequestContext,
        request: BatchRequest,
    ) -> AppResult<BatchResult> {
        let operation_id = require_operation_id(request.operation_id.as_deref())?;
        let mut lines = prepare_batch(request)?;
        lines.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            lines = lines.len(),
            "inventory.batch.start"
        );

        let result = self.batch_in_tx(ctx, &operation_id, lines).await;
        trace_outcome("inventory.batch.finish", ctx, &operation_id, &result);
        result
    }

    async fn batch_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        lines: Vec<PreparedLine>,
    ) -> AppResult<BatchResult> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(result) = self
            .guard
            .admit::<BatchResult>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(result);
        }

        let mut updated_ids = Vec::with_capacity(lines.len());
        let mut inventory_updates = Vec::with_capacity(lines.len());

        for line in lines {
            let update = apply_batch_line(tx.as_mut(), ctx, operation_id, line).await?;
            updated_ids.push(update.inventory_id.clone());
            inventory_updates.push(update);
        }

        let result = BatchResult {
            success: true,
            updated_ids,
            inventory_updates,
        };

        self.guard
            .complete(tx.as_mut(), operation_id, &result)
            .await?;
        tx.commit().await?;
        Ok(result)
    }

    // ========================================================================
    // Archive / delete
    // ========================================================================

    /// Remove an item from the catalogue.
    ///
    /// Items referenced by receipt lines are archived instead of deleted and
    /// their remaining stock is written off through an ADJUST movement.
    pub async fn remove_item(
        &self,
        ctx: &RequestContext,
        id: &str,
        operation_id: Option<&str>,
    ) -> AppResult<RemoveItemResult> {
        let operation_id = require_operation_id(operation_id)?;
        let id = normalize_inventory_id(Some(id)).map_err(|m| AppError::invalid("id", m))?;

        tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            inventory_id = %id,
            "inventory.delete.start"
        );

        let result = self.remove_in_tx(ctx, &operation_id, &id).await;
        trace_outcome("inventory.delete.finish", ctx, &operation_id, &result);
        result
    }

    async fn remove_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        id: &str,
    ) -> AppResult<RemoveItemResult> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(result) = self
            .guard
            .admit::<RemoveItemResult>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(result);
        }

        let item = tx
            .lock_item(id)
            .await?
            .ok_or_else(|| AppError::not_found("Inventory item", id))?;
        let ref_count = tx.count_receipt_refs(id).await?;

        let result = if ref_count > 0 {
            let mut write = ItemWrite::details(ItemDetails {
                status: Some(STATUS_ARCHIVED.to_string()),
                ..Default::default()
            });

            if item.quantity > 0 {
                let qty_delta = -item.quantity;
                let outcome =
                    apply_movement(stock_of(&item), qty_delta, None, MovementReason::Adjust)
                        .map_err(|e| AppError::from_cost(id, e))?;

                tx.insert_movement(&NewMovement {
                    inventory_id: id.to_string(),
                    qty_delta,
                    reason: MovementReason::Adjust,
                    unit_cost: None,
                    unit_cost_used: Some(item.cost),
                    on_hand_after: outcome.quantity,
                    avg_cost_after: outcome.avg_cost,
                    ref_type: MovementRef::Archive,
                    ref_id: operation_id.to_string(),
                    request_id: Some(ctx.request_id.clone()),
                    operation_id: operation_id.for_item_action("archive", id),
                })
                .await?;

                tx.insert_audit(&NewAuditEntry::valued(
                    item.sku.as_deref(),
                    item.name.as_deref(),
                    "ARCHIVE",
                    qty_delta,
                    item.cost,
                    operation_id.as_str(),
                ))
                .await?;

                write.quantity = Some(outcome.quantity);
                write.cost = Some(outcome.avg_cost);
            }

            let archived = tx.update_item(id, &write).await?;
            tracing::info!(
                request_id = %ctx.request_id,
                inventory_id = %id,
                ref_count,
                "inventory.delete.archived"
            );
            RemoveItemResult {
                archived: true,
                ref_count,
                item: Some(archived),
            }
        } else {
            tx.delete_item(id).await?;
            RemoveItemResult {
                archived: false,
                ref_count: 0,
                item: None,
            }
        };

        self.guard
            .complete(tx.as_mut(), operation_id, &result)
            .await?;
        tx.commit().await?;
        Ok(result)
    }
}

/// Validate every batch line up front; the first violation fails the batch
fn prepare_batch(request: BatchRequest) -> AppResult<Vec<PreparedLine>> {
    if request.items.is_empty() {
        return Err(AppError::invalid("items", "At least one item is required"));
    }

    let mut lines = Vec::with_capacity(request.items.len());
    for (index, line) in request.items.into_iter().enumerate() {
        let field = |name: &str| format!("items[{}].{}", index, name);

        let id = normalize_inventory_id(line.id.as_deref()).map_err(|m| AppError::invalid(field("id"), m))?;
        let qty_delta = line
            .qty_delta
            .ok_or_else(|| AppError::invalid(field("qtyDelta"), "qtyDelta is required"))?;
        validate_quantity_delta(qty_delta).map_err(|m| AppError::invalid(field("qtyDelta"), m))?;

        let reason = match line.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(raw) => MovementReason::parse(raw)
                .ok_or_else(|| AppError::invalid(field("reason"), format!("Unknown reason {}", raw)))?,
            None => MovementReason::from_delta(qty_delta),
        };
        validate_reason_sign(reason, qty_delta).map_err(|m| AppError::invalid(field("qtyDelta"), m))?;

        let unit_cost = match line.unit_cost {
            Some(cost) => {
                validate_unit_cost(cost).map_err(|m| AppError::invalid(field("unitCost"), m))?;
                Some(round_cost(cost))
            }
            None => None,
        };
        if reason == MovementReason::Receive && unit_cost.is_none() {
            return Err(AppError::invalid(
                field("unitCost"),
                "unitCost is required when receiving stock",
            ));
        }
        validate_details(&line.details, &format!("items[{}].", index))?;

        lines.push(PreparedLine {
            index,
            id,
            qty_delta,
            reason,
            unit_cost,
            operator: line.operator,
            details: line.details,
        });
    }

    if let Some(dup) = find_duplicate(lines.iter().map(|l| l.id.as_str())) {
        return Err(AppError::InvalidArgument {
            field: Some("items".to_string()),
            message: format!("Duplicate inventory id {} in batch", dup),
            details: Some(serde_json::json!({ "inventoryId": dup })),
        });
    }

    Ok(lines)
}

async fn apply_batch_line(
    tx: &mut dyn LedgerTx,
    ctx: &RequestContext,
    operation_id: &OperationId,
    line: PreparedLine,
) -> AppResult<InventoryUpdate> {
    let item = match tx.lock_item(&line.id).await? {
        Some(item) => item,
        None => {
            if line.qty_delta < 0 {
                return Err(AppError::InventoryInsufficient {
                    inventory_id: line.id.clone(),
                    available: 0,
                    requested: -line.qty_delta,
                });
            }
            if line.qty_delta == 0 {
                return Err(AppError::not_found("Inventory item", line.id.clone()));
            }
            if line.unit_cost.is_none() {
                return Err(AppError::invalid(
                    format!("items[{}].unitCost", line.index),
                    "unitCost is required for a new item",
                ));
            }
            tx.create_item_if_absent(&line.id, &line.details).await?;
            tx.lock_item(&line.id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("item {} vanished after insert", line.id)))?
        }
    };

    let prior = stock_of(&item);
    let outcome = apply_movement(prior, line.qty_delta, line.unit_cost, line.reason)
        .map_err(|e| AppError::from_cost(&line.id, e))?;

    let write = ItemWrite {
        details: line.details,
        quantity: Some(outcome.quantity),
        cost: Some(outcome.avg_cost),
    };
    let updated = tx.update_item(&line.id, &write).await?;

    if line.qty_delta != 0 || outcome.avg_cost != prior.avg_cost {
        tx.insert_movement(&NewMovement {
            inventory_id: line.id.clone(),
            qty_delta: line.qty_delta,
            reason: line.reason,
            unit_cost: line.unit_cost,
            unit_cost_used: outcome.unit_cost_used,
            on_hand_after: outcome.quantity,
            avg_cost_after: outcome.avg_cost,
            ref_type: MovementRef::Batch,
            ref_id: operation_id.to_string(),
            request_id: Some(ctx.request_id.clone()),
            operation_id: operation_id.for_item(&line.id),
        })
        .await?;

        let valued_at = outcome
            .unit_cost_used
            .or(line.unit_cost)
            .unwrap_or(outcome.avg_cost);
        tx.insert_audit(
            &NewAuditEntry::valued(
                updated.sku.as_deref(),
                updated.name.as_deref(),
                line.reason.as_str(),
                line.qty_delta,
                valued_at,
                operation_id.as_str(),
            )
            .with_operator(line.operator),
        )
        .await?;
    }

    tracing::debug!(
        request_id = %ctx.request_id,
        operation_id = %operation_id,
        inventory_id = %line.id,
        action = line.reason.as_str(),
        delta = line.qty_delta,
        avg_cost = %outcome.avg_cost,
        "inventory.batch.line"
    );

    Ok(update_of(&updated))
}
