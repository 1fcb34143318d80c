//! Per-table primary-key policy
//!
//! The WHERE predicate for UPDATE/DELETE is exactly the column set listed
//! here. The policy is data, not control flow: adding a table means adding
//! an entry, not a code path.

use crate::domain::BusinessType;

/// Primary-key columns for tables synced by retail terminals.
const RETAIL_KEYS: &[(&str, &[&str])] = &[
    ("Sales", &["InvoiceNo"]),
    ("SalesDetail", &["InvoiceNo", "StockId"]),
    ("StockItems", &["StockId"]),
    ("PaymentReceived", &["InvoiceNo", "Id"]),
    ("Payment", &["Payment"]),
];

/// Primary-key columns for tables synced by hospitality terminals.
const HOSPITALITY_KEYS: &[(&str, &[&str])] = &[
    ("Sales", &["OrderNo"]),
    ("SalesDetail", &["OrderNo", "ItemCode"]),
    ("MenuItem", &["ItemCode"]),
    ("SubMenuLinkDetail", &["ItemCode"]),
    ("PaymentReceived", &["OrderNo", "Id"]),
    ("Payment", &["Payment"]),
];

/// Fallback key for tables without a policy entry.
const FALLBACK_KEY: &[&str] = &["id"];

/// Resolve the primary-key column set for `(table, business_type)`.
///
/// Tables without an entry for the given vertical use the `id` fallback.
pub fn primary_key_columns(table: &str, business_type: BusinessType) -> &'static [&'static str] {
    let entries = match business_type {
        BusinessType::Retail => RETAIL_KEYS,
        BusinessType::Hospitality => HOSPITALITY_KEYS,
    };

    entries
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, cols)| *cols)
        .unwrap_or(FALLBACK_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retail_keys() {
        assert_eq!(
            primary_key_columns("Sales", BusinessType::Retail),
            &["InvoiceNo"]
        );
        assert_eq!(
            primary_key_columns("SalesDetail", BusinessType::Retail),
            &["InvoiceNo", "StockId"]
        );
        assert_eq!(
            primary_key_columns("StockItems", BusinessType::Retail),
            &["StockId"]
        );
        assert_eq!(
            primary_key_columns("PaymentReceived", BusinessType::Retail),
            &["InvoiceNo", "Id"]
        );
        assert_eq!(
            primary_key_columns("Payment", BusinessType::Retail),
            &["Payment"]
        );
    }

    #[test]
    fn test_hospitality_keys() {
        assert_eq!(
            primary_key_columns("Sales", BusinessType::Hospitality),
            &["OrderNo"]
        );
        assert_eq!(
            primary_key_columns("SalesDetail", BusinessType::Hospitality),
            &["OrderNo", "ItemCode"]
        );
        assert_eq!(
            primary_key_columns("MenuItem", BusinessType::Hospitality),
            &["ItemCode"]
        );
        assert_eq!(
            primary_key_columns("SubMenuLinkDetail", BusinessType::Hospitality),
            &["ItemCode"]
        );
    }

    #[test]
    fn test_fallback_key() {
        assert_eq!(
            primary_key_columns("Customers", BusinessType::Retail),
            &["id"]
        );
        // MenuItem is a hospitality table; the retail vertical has no entry
        // for it and falls back to `id`.
        assert_eq!(
            primary_key_columns("MenuItem", BusinessType::Retail),
            &["id"]
        );
        assert_eq!(
            primary_key_columns("StockItems", BusinessType::Hospitality),
            &["id"]
        );
    }
}
