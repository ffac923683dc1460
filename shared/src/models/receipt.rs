//! Goods-received receipt models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::InventoryUpdate;

/// Default receipt entry mode
pub const DEFAULT_RECEIPT_MODE: &str = "MANUAL";

/// Receipt header as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: i64,
    pub received_at: DateTime<Utc>,
    pub vendor: Option<String>,
    pub mode: String,
    pub notes: Option<String>,
    pub images: Vec<String>,
    pub operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Receipt line as persisted, joined with the item's display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub id: i64,
    pub receipt_id: i64,
    pub inventory_id: String,
    pub qty_received: i64,
    pub unit_cost: Decimal,
    pub line_total: Decimal,
    pub display_name: String,
    pub sku: String,
}

/// Receipt header to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewReceipt {
    pub received_at: DateTime<Utc>,
    pub vendor: Option<String>,
    pub mode: String,
    pub notes: Option<String>,
    pub images: Vec<String>,
    pub operation_id: String,
    pub request_id: Option<String>,
}

/// Receipt line to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewReceiptItem {
    pub receipt_id: i64,
    pub inventory_id: String,
    pub qty_received: i64,
    pub unit_cost: Decimal,
}

/// Header fields of a receipt, all optional.
///
/// `vendor` and `notes` distinguish an absent field (`None`, left unchanged)
/// from an explicit `null` or blank value (`Some(None)`, cleared).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptHeaderPatch {
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "present")]
    #[validate(length(max = 255))]
    pub vendor: Option<Option<String>>,
    #[validate(length(max = 32))]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "present")]
    #[validate(length(max = 4000))]
    pub notes: Option<Option<String>>,
    #[validate(length(max = 50))]
    pub images: Option<Vec<String>>,
}

impl ReceiptHeaderPatch {
    /// Normalise blank strings the way the header is stored
    pub fn normalized(mut self) -> Self {
        self.vendor = self.vendor.map(|v| v.and_then(non_blank));
        self.mode = self.mode.map(|m| non_blank(m).unwrap_or_else(|| DEFAULT_RECEIPT_MODE.to_string()));
        self.notes = self.notes.map(|n| n.filter(|n| !n.trim().is_empty()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Marks a field as sent, so an explicit `null` deserializes to `Some(None)`
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// One submitted receipt line
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLineInput {
    pub inventory_id: Option<String>,
    pub qty: Option<i64>,
    pub unit_cost: Option<Decimal>,
}

/// Receipt creation request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReceiptInput {
    pub operation_id: Option<String>,
    #[serde(flatten)]
    pub header: ReceiptHeaderPatch,
    #[serde(default)]
    pub items: Vec<ReceiptLineInput>,
}

/// One line mutation in a receipt edit
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLineEdit {
    pub id: i64,
    #[serde(default)]
    pub remove: bool,
    pub qty_received: Option<i64>,
    pub unit_cost: Option<Decimal>,
}

/// Receipt edit request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReceiptInput {
    pub operation_id: Option<String>,
    #[serde(flatten)]
    pub header: ReceiptHeaderPatch,
    pub items: Option<Vec<ReceiptLineEdit>>,
}

/// Full receipt view returned by create, edit and detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDetail {
    pub receipt: Receipt,
    pub items: Vec<ReceiptItem>,
    pub inventory_updates: Vec<InventoryUpdate>,
}

/// Result of deleting a whole receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReceiptResult {
    pub success: bool,
    pub receipt_id: i64,
    pub inventory_updates: Vec<InventoryUpdate>,
}

/// Receipt row in the list view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub id: i64,
    pub received_at: DateTime<Utc>,
    pub vendor: Option<String>,
    pub mode: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub operation_id: String,
    pub total_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_normalization() {
        let patch = ReceiptHeaderPatch {
            vendor: Some(Some("  Newegg ".to_string())),
            mode: Some("  ".to_string()),
            notes: Some(Some("   ".to_string())),
            ..Default::default()
        }
        .normalized();
        assert_eq!(patch.vendor, Some(Some("Newegg".to_string())));
        assert_eq!(patch.mode.as_deref(), Some(DEFAULT_RECEIPT_MODE));
        assert_eq!(patch.notes, Some(None));
    }

    #[test]
    fn test_header_absent_null_and_blank_fields() {
        let absent: ReceiptHeaderPatch = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(absent.vendor, None);
        assert!(absent.is_empty());

        let cleared: ReceiptHeaderPatch =
            serde_json::from_value(serde_json::json!({ "vendor": null, "notes": " " })).unwrap();
        let cleared = cleared.normalized();
        assert_eq!(cleared.vendor, Some(None));
        assert_eq!(cleared.notes, Some(None));
        assert!(!cleared.is_empty());
    }

    #[test]
    fn test_header_length_limits() {
        let patch = ReceiptHeaderPatch {
            vendor: Some(Some("v".repeat(256))),
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let ok = ReceiptHeaderPatch {
            vendor: Some(Some("Micro Center".to_string())),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_line_edit_remove_defaults_false() {
        let edit: ReceiptLineEdit =
            serde_json::from_value(serde_json::json!({ "id": 3, "qtyReceived": 2 })).unwrap();
        assert!(!edit.remove);
        assert_eq!(edit.qty_received, Some(2));
    }
}
