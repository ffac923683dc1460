//! Inventory movement ledger models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a movement happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    Receive,
    Consume,
    Adjust,
    Opening,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Receive => "RECEIVE",
            MovementReason::Consume => "CONSUME",
            MovementReason::Adjust => "ADJUST",
            MovementReason::Opening => "OPENING",
        }
    }

    /// Parse a caller-supplied reason (case and surrounding whitespace ignored)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RECEIVE" => Some(MovementReason::Receive),
            "CONSUME" => Some(MovementReason::Consume),
            "ADJUST" => Some(MovementReason::Adjust),
            "OPENING" => Some(MovementReason::Opening),
            _ => None,
        }
    }

    /// Reason implied by the sign of a quantity change
    pub fn from_delta(qty_delta: i64) -> Self {
        match qty_delta.signum() {
            1 => MovementReason::Receive,
            -1 => MovementReason::Consume,
            _ => MovementReason::Adjust,
        }
    }
}

impl fmt::Display for MovementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a movement refers back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementRef {
    Receipt,
    Batch,
    Adjust,
    Archive,
}

impl MovementRef {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementRef::Receipt => "RECEIPT",
            MovementRef::Batch => "BATCH",
            MovementRef::Adjust => "ADJUST",
            MovementRef::Archive => "ARCHIVE",
        }
    }
}

/// Immutable ledger entry as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub id: i64,
    pub inventory_id: String,
    pub qty_delta: i64,
    pub reason: String,
    pub unit_cost: Option<Decimal>,
    pub unit_cost_used: Option<Decimal>,
    pub on_hand_after: i64,
    pub avg_cost_after: Decimal,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub request_id: Option<String>,
    pub operation_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Ledger entry to append
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovement {
    pub inventory_id: String,
    pub qty_delta: i64,
    pub reason: MovementReason,
    pub unit_cost: Option<Decimal>,
    pub unit_cost_used: Option<Decimal>,
    pub on_hand_after: i64,
    pub avg_cost_after: Decimal,
    pub ref_type: MovementRef,
    pub ref_id: String,
    pub request_id: Option<String>,
    pub operation_id: String,
}

/// Movement enriched for the item history view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementView {
    #[serde(flatten)]
    pub movement: Movement,
    pub vendor: Option<String>,
    pub receipt_received_at: Option<DateTime<Utc>>,
    pub prev_qty: i64,
    pub prev_cost: Decimal,
}
