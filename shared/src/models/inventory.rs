//! Inventory item models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an item that is available for use
pub const STATUS_IN_STOCK: &str = "In Stock";

/// Lifecycle status of an item retired from use but kept for ledger history
pub const STATUS_ARCHIVED: &str = "Archived";

/// Current-state projection of one inventory item.
///
/// `quantity` and `cost` are only ever changed together with a movement row;
/// the remaining fields are descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub category: Option<String>,
    pub name: Option<String>,
    pub keyword: Option<String>,
    pub sku: Option<String>,
    pub quantity: i64,
    /// Weighted-average unit cost
    pub cost: Decimal,
    pub price: Decimal,
    pub location: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Whether the item has been archived
    pub fn is_archived(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case(STATUS_ARCHIVED))
            .unwrap_or(false)
    }
}

/// Descriptive fields of an item, all optional.
///
/// A field that is `None` is left untouched when patching, and falls back to
/// a default when creating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetails {
    pub category: Option<String>,
    pub name: Option<String>,
    pub keyword: Option<String>,
    pub sku: Option<String>,
    pub price: Option<Decimal>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl ItemDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Full write of an item row: details plus the quantity/cost pair
/// produced by the cost engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemWrite {
    pub details: ItemDetails,
    pub quantity: Option<i64>,
    pub cost: Option<Decimal>,
}

impl ItemWrite {
    /// Write only the quantity/cost pair
    pub fn stock(quantity: i64, cost: Decimal) -> Self {
        Self {
            details: ItemDetails::default(),
            quantity: Some(quantity),
            cost: Some(cost),
        }
    }

    /// Write only descriptive fields
    pub fn details(details: ItemDetails) -> Self {
        Self {
            details,
            quantity: None,
            cost: None,
        }
    }
}

/// Partial update of a single item submitted by a caller.
///
/// Every field is explicitly optional: `None` means the caller did not send it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryPatch {
    pub operation_id: Option<String>,
    pub quantity: Option<i64>,
    pub cost: Option<Decimal>,
    pub operator: Option<String>,
    #[serde(flatten)]
    pub details: ItemDetails,
}

/// One line of a batch application
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLine {
    pub id: Option<String>,
    pub qty_delta: Option<i64>,
    pub reason: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub operator: Option<String>,
    #[serde(flatten)]
    pub details: ItemDetails,
}

/// Batch application request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub operation_id: Option<String>,
    #[serde(default)]
    pub items: Vec<BatchLine>,
}

/// Batch application result, cached against the operation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub updated_ids: Vec<String>,
    pub inventory_updates: Vec<crate::InventoryUpdate>,
}

/// Result of removing an item from the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveItemResult {
    pub archived: bool,
    pub ref_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<InventoryItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: Option<&str>) -> InventoryItem {
        InventoryItem {
            id: "I1".to_string(),
            category: None,
            name: None,
            keyword: None,
            sku: None,
            quantity: 0,
            cost: Decimal::ZERO,
            price: Decimal::ZERO,
            location: None,
            status: status.map(str::to_string),
            notes: None,
            metadata: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_archived() {
        assert!(item(Some("Archived")).is_archived());
        assert!(item(Some(" archived ")).is_archived());
        assert!(!item(Some("In Stock")).is_archived());
        assert!(!item(None).is_archived());
    }

    #[test]
    fn test_patch_absent_fields_are_none() {
        let patch: InventoryPatch =
            serde_json::from_value(serde_json::json!({ "operationId": "op", "name": "SSD" }))
                .unwrap();
        assert_eq!(patch.quantity, None);
        assert_eq!(patch.cost, None);
        assert_eq!(patch.details.name.as_deref(), Some("SSD"));
        assert!(patch.details.sku.is_none());
    }

    #[test]
    fn test_batch_line_accepts_numeric_cost() {
        let line: BatchLine = serde_json::from_value(serde_json::json!({
            "id": "I1",
            "qtyDelta": 5,
            "unitCost": 7.25
        }))
        .unwrap();
        assert_eq!(line.qty_delta, Some(5));
        assert_eq!(line.unit_cost, Some(Decimal::new(725, 2)));
    }
}
