//! Human-auditable trail of inventory-affecting events

use rust_decimal::Decimal;
use serde::Serialize;

/// Audit entry type for a receipt line edit
pub const AUDIT_RECEIPT_EDIT: &str = "RECEIPT_EDIT";

/// Audit entry type for a receipt line removal
pub const AUDIT_RECEIPT_DELETE: &str = "RECEIPT_DELETE";

/// Audit entry to append. Write-only from the ledger's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAuditEntry {
    pub sku: String,
    pub name: Option<String>,
    pub entry_type: String,
    pub qty_change: i64,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub ref_id: String,
    pub operator: Option<String>,
}

impl NewAuditEntry {
    /// Entry whose total value is `qty_change * unit_cost`
    pub fn valued(
        sku: Option<&str>,
        name: Option<&str>,
        entry_type: impl Into<String>,
        qty_change: i64,
        unit_cost: Decimal,
        ref_id: impl Into<String>,
    ) -> Self {
        Self {
            sku: sku.unwrap_or_default().to_string(),
            name: name.map(str::to_string),
            entry_type: entry_type.into(),
            qty_change,
            unit_cost,
            total_value: Decimal::from(qty_change) * unit_cost,
            ref_id: ref_id.into(),
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: Option<String>) -> Self {
        self.operator = operator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valued_entry_total() {
        let entry = NewAuditEntry::valued(None, Some("GPU"), "RECEIVE", 3, Decimal::new(250, 2), "7");
        assert_eq!(entry.total_value, Decimal::new(750, 2));
        assert_eq!(entry.sku, "");
        assert_eq!(entry.operator, None);
    }
}
