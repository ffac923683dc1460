//! Validation utilities for the stock ledger
//!
//! All checks fail fast with a static message; callers attach the field name.

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::models::MovementReason;

// ============================================================================
// Limits
// ============================================================================

/// Largest absolute quantity accepted on any single line
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Longest accepted inventory identifier
pub const MAX_INVENTORY_ID_LEN: usize = 128;

/// Largest unit cost the `NUMERIC(12,4)` columns can hold
pub fn max_unit_cost() -> Decimal {
    Decimal::new(999_999_999_999, 4)
}

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

// ============================================================================
// Identifiers
// ============================================================================

/// Trim an inventory id, rejecting blank or oversized values
pub fn normalize_inventory_id(raw: Option<&str>) -> Result<String, &'static str> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err("Inventory id is required");
    }
    if trimmed.len() > MAX_INVENTORY_ID_LEN {
        return Err("Inventory id is too long");
    }
    Ok(trimmed.to_string())
}

/// Trimmed SKU, or `None` when blank
pub fn normalize_sku(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Key under which SKU uniqueness is enforced (case and whitespace insensitive)
pub fn sku_key(sku: &str) -> String {
    sku.trim().to_lowercase()
}

/// First id that appears more than once
pub fn find_duplicate<'a, I>(ids: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}

// ============================================================================
// Quantities and costs
// ============================================================================

/// Absolute on-hand quantity as submitted by a caller
pub fn validate_quantity(qty: i64) -> Result<(), &'static str> {
    if qty < 0 {
        return Err("Quantity cannot be negative");
    }
    if qty > MAX_QUANTITY {
        return Err("Quantity is too large");
    }
    Ok(())
}

/// Signed quantity change on a batch line
pub fn validate_quantity_delta(delta: i64) -> Result<(), &'static str> {
    if delta.checked_abs().map_or(true, |abs| abs > MAX_QUANTITY) {
        return Err("Quantity change is too large");
    }
    Ok(())
}

/// Received quantity on a receipt line
pub fn validate_received_qty(qty: i64) -> Result<(), &'static str> {
    if qty <= 0 {
        return Err("Received quantity must be a positive integer");
    }
    if qty > MAX_QUANTITY {
        return Err("Received quantity is too large");
    }
    Ok(())
}

/// Unit cost, average cost or price
pub fn validate_unit_cost(cost: Decimal) -> Result<(), &'static str> {
    if cost.is_sign_negative() && !cost.is_zero() {
        return Err("Cost cannot be negative");
    }
    if cost > max_unit_cost() {
        return Err("Cost is too large");
    }
    Ok(())
}

/// Check that an explicit reason agrees with the sign of the change
pub fn validate_reason_sign(reason: MovementReason, delta: i64) -> Result<(), &'static str> {
    match reason {
        MovementReason::Receive | MovementReason::Opening if delta <= 0 => {
            Err("Receiving requires a positive quantity change")
        }
        MovementReason::Consume if delta >= 0 => {
            Err("Consuming requires a negative quantity change")
        }
        _ => Ok(()),
    }
}

/// Clamp a caller-supplied page size
pub fn clamp_list_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}
