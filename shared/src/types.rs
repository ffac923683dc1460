//! Common types used across the platform

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted length of a caller-supplied operation id
pub const MAX_OPERATION_ID_LEN: usize = 200;

/// Caller-supplied identifier scoping the at-most-once guarantee of one
/// logical mutation. Always trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Parse a raw operation id, rejecting missing or blank values
    pub fn parse(raw: Option<&str>) -> Result<Self, &'static str> {
        let trimmed = raw.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return Err("operationId is required");
        }
        if trimmed.len() > MAX_OPERATION_ID_LEN {
            return Err("operationId is too long");
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Movement-level operation id for one inventory row touched by this operation.
    ///
    /// The movement table holds a unique index on this value, so a second
    /// application of the same operation to the same item fails at the storage
    /// layer even if the idempotency record were bypassed.
    pub fn for_item(&self, inventory_id: &str) -> String {
        format!("{}:{}", self.0, inventory_id)
    }

    /// Movement-level operation id scoped to a sub-action (edit, delete) on an item
    pub fn for_item_action(&self, action: &str, inventory_id: &str) -> String {
        format!("{}:{}:{}", self.0, action, inventory_id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Projection of one inventory item after a mutation, as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    pub inventory_id: String,
    pub on_hand_qty: i64,
    pub avg_cost: rust_decimal::Decimal,
}

/// Generic acknowledgement body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
