//! Row-Op Dispatcher
//!
//! Turns a decoded [`RowOp`] into one parameterised statement and executes
//! it against the tenant's database. INSERT is an upsert so replays are
//! idempotent; UPDATE builds its WHERE predicate from the `old_` pre-image
//! when present; DELETE keys directly off the payload. The WHERE column
//! set is exactly the primary-key policy for `(table, business_type)`.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::{primary_key_columns, RowOp, RowOperation};
use crate::infra::target::{quote_ident, TargetStore};
use crate::infra::tenant::TenantDirectory;
use crate::infra::{BridgeError, Result};

/// How a duplicate key on INSERT is absorbed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Incremental path: duplicate keys upgrade to UPDATE via upsert
    Incremental,
    /// Bootstrap path: duplicate rows are skipped, keeping re-seeds idempotent
    Bootstrap,
}

/// A built statement plus its bind values, in order
#[derive(Debug, Clone)]
pub struct StatementPlan {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Build the statement for one row operation without executing it.
pub fn build_statement(op: &RowOp, mode: ApplyMode) -> Result<StatementPlan> {
    match op.op {
        RowOperation::Insert => build_insert(op, mode),
        RowOperation::Update => build_update(op),
        RowOperation::Delete => build_delete(op),
    }
}

/// Payload keys that are row columns (pre-image keys excluded), in order.
fn column_keys(op: &RowOp) -> Vec<&str> {
    op.payload
        .keys()
        .map(String::as_str)
        .filter(|k| !k.starts_with("old_"))
        .collect()
}

fn build_insert(op: &RowOp, mode: ApplyMode) -> Result<StatementPlan> {
    let columns = column_keys(op);
    if columns.is_empty() {
        return Err(BridgeError::Validation(format!(
            "empty payload for INSERT into {}",
            op.table_name
        )));
    }

    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let params: Vec<Value> = columns.iter().map(|c| op.payload[*c].clone()).collect();

    let sql = match mode {
        ApplyMode::Incremental => {
            let updates: Vec<String> = column_list
                .iter()
                .map(|c| format!("{c} = VALUES({c})"))
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                quote_ident(&op.table_name),
                column_list.join(", "),
                placeholders,
                updates.join(", ")
            )
        }
        ApplyMode::Bootstrap => format!(
            "INSERT IGNORE INTO {} ({}) VALUES ({})",
            quote_ident(&op.table_name),
            column_list.join(", "),
            placeholders
        ),
    };

    Ok(StatementPlan { sql, params })
}

fn build_update(op: &RowOp) -> Result<StatementPlan> {
    let columns = column_keys(op);
    if columns.is_empty() {
        return Err(BridgeError::Validation(format!(
            "empty payload for UPDATE of {}",
            op.table_name
        )));
    }

    let pk_columns = primary_key_columns(&op.table_name, op.business_type);

    let set_list: Vec<String> = columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect();
    let mut params: Vec<Value> = columns.iter().map(|c| op.payload[*c].clone()).collect();

    let mut predicates = Vec::with_capacity(pk_columns.len());
    for pk in pk_columns {
        // Pre-image wins: `old_<PKcol>` carries the value the row currently
        // holds when the key itself is being changed.
        let value = op
            .payload
            .get(&format!("old_{pk}"))
            .or_else(|| op.payload.get(*pk))
            .ok_or_else(|| {
                BridgeError::Validation(format!(
                    "UPDATE on {} is missing primary key column {pk}",
                    op.table_name
                ))
            })?;
        predicates.push(format!("{} = ?", quote_ident(pk)));
        params.push(value.clone());
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(&op.table_name),
        set_list.join(", "),
        predicates.join(" AND ")
    );
    Ok(StatementPlan { sql, params })
}

fn build_delete(op: &RowOp) -> Result<StatementPlan> {
    let pk_columns = primary_key_columns(&op.table_name, op.business_type);

    let mut predicates = Vec::with_capacity(pk_columns.len());
    let mut params = Vec::with_capacity(pk_columns.len());
    for pk in pk_columns {
        let value = op.payload.get(*pk).ok_or_else(|| {
            BridgeError::Validation(format!(
                "DELETE on {} is missing primary key column {pk}",
                op.table_name
            ))
        })?;
        predicates.push(format!("{} = ?", quote_ident(pk)));
        params.push(value.clone());
    }

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(&op.table_name),
        predicates.join(" AND ")
    );
    Ok(StatementPlan { sql, params })
}

/// Executes row operations against the routed tenant database
pub struct RowOpDispatcher {
    tenants: Arc<TenantDirectory>,
    target: Arc<TargetStore>,
}

impl RowOpDispatcher {
    pub fn new(tenants: Arc<TenantDirectory>, target: Arc<TargetStore>) -> Self {
        Self { tenants, target }
    }

    /// Apply one row operation; returns affected rows.
    pub async fn apply(&self, op: &RowOp, mode: ApplyMode) -> Result<u64> {
        let database = self
            .tenants
            .require_database(&op.store_id, &op.app_id)
            .await?;

        let plan = build_statement(op, mode)?;
        debug!(
            store_id = %op.store_id,
            app_id = %op.app_id,
            table = %op.table_name,
            op = %op.op,
            sync_id = %op.sync_id,
            "applying row operation"
        );

        match self.target.execute(&database, &plan.sql, &plan.params).await {
            Ok(affected) => Ok(affected),
            // The bootstrap path treats an already-present row as done.
            Err(e) if mode == ApplyMode::Bootstrap && e.is_duplicate_key() => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{decode_xml_record, AppId, BusinessType, StoreId};
    use serde_json::json;

    fn row_op(table: &str, op: RowOperation, business: BusinessType, xml: &str) -> RowOp {
        RowOp {
            store_id: StoreId::from("239"),
            app_id: AppId::from("pos_239"),
            table_name: table.to_string(),
            op,
            payload: decode_xml_record(xml).unwrap(),
            business_type: business,
            sync_id: "s1".to_string(),
        }
    }

    #[test]
    fn test_insert_upsert_sql() {
        let op = row_op(
            "SalesDetail",
            RowOperation::Insert,
            BusinessType::Retail,
            "<row><InvoiceNo>7</InvoiceNo><StockId>S1</StockId><Qty>2</Qty></row>",
        );
        let plan = build_statement(&op, ApplyMode::Incremental).unwrap();
        assert_eq!(
            plan.sql,
            "INSERT INTO `SalesDetail` (`InvoiceNo`, `StockId`, `Qty`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `InvoiceNo` = VALUES(`InvoiceNo`), \
             `StockId` = VALUES(`StockId`), `Qty` = VALUES(`Qty`)"
        );
        assert_eq!(plan.params, vec![json!("7"), json!("S1"), json!("2")]);
    }

    #[test]
    fn test_insert_bootstrap_uses_ignore() {
        let op = row_op(
            "StockItems",
            RowOperation::Insert,
            BusinessType::Retail,
            "<row><StockId>007</StockId><Description>Widget</Description></row>",
        );
        let plan = build_statement(&op, ApplyMode::Bootstrap).unwrap();
        assert_eq!(
            plan.sql,
            "INSERT IGNORE INTO `StockItems` (`StockId`, `Description`) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_update_with_pre_image() {
        let op = row_op(
            "MenuItem",
            RowOperation::Update,
            BusinessType::Hospitality,
            "<new><ItemCode>M1</ItemCode><Description1>b</Description1></new>\
             <old><ItemCode>M1</ItemCode></old>",
        );
        let plan = build_statement(&op, ApplyMode::Incremental).unwrap();
        assert_eq!(
            plan.sql,
            "UPDATE `MenuItem` SET `ItemCode` = ?, `Description1` = ? WHERE `ItemCode` = ?"
        );
        // SET values come from <new>; the WHERE value comes from <old>.
        assert_eq!(plan.params, vec![json!("M1"), json!("b"), json!("M1")]);
    }

    #[test]
    fn test_update_pre_image_overrides_new_key() {
        let op = row_op(
            "Sales",
            RowOperation::Update,
            BusinessType::Retail,
            "<new><InvoiceNo>8</InvoiceNo><Total>10</Total></new>\
             <old><InvoiceNo>7</InvoiceNo></old>",
        );
        let plan = build_statement(&op, ApplyMode::Incremental).unwrap();
        // The renumbered invoice is located by its old key.
        assert_eq!(*plan.params.last().unwrap(), json!("7"));
    }

    #[test]
    fn test_update_without_pre_image_uses_payload_key() {
        let op = row_op(
            "Sales",
            RowOperation::Update,
            BusinessType::Retail,
            "<row><InvoiceNo>7</InvoiceNo><Total>10</Total></row>",
        );
        let plan = build_statement(&op, ApplyMode::Incremental).unwrap();
        assert!(plan.sql.ends_with("WHERE `InvoiceNo` = ?"));
        assert_eq!(*plan.params.last().unwrap(), json!("7"));
    }

    #[test]
    fn test_update_missing_pk_is_rejected() {
        let op = row_op(
            "SalesDetail",
            RowOperation::Update,
            BusinessType::Retail,
            "<row><InvoiceNo>7</InvoiceNo><Qty>3</Qty></row>",
        );
        let err = build_statement(&op, ApplyMode::Incremental).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert!(err.to_string().contains("StockId"));
    }

    #[test]
    fn test_delete_uses_payload_directly() {
        let op = row_op(
            "SalesDetail",
            RowOperation::Delete,
            BusinessType::Hospitality,
            "<row><OrderNo>42</OrderNo><ItemCode>M1</ItemCode></row>",
        );
        let plan = build_statement(&op, ApplyMode::Incremental).unwrap();
        assert_eq!(
            plan.sql,
            "DELETE FROM `SalesDetail` WHERE `OrderNo` = ? AND `ItemCode` = ?"
        );
        assert_eq!(plan.params, vec![json!("42"), json!("M1")]);
    }

    #[test]
    fn test_delete_ignores_pre_image_keys() {
        // DELETE takes WHERE values from the payload, not from `old_`.
        let op = row_op(
            "Sales",
            RowOperation::Delete,
            BusinessType::Retail,
            "<old><InvoiceNo>7</InvoiceNo></old>",
        );
        let err = build_statement(&op, ApplyMode::Incremental).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_fallback_table_uses_id_key() {
        let op = row_op(
            "Customers",
            RowOperation::Delete,
            BusinessType::Retail,
            "<row><id>5</id></row>",
        );
        let plan = build_statement(&op, ApplyMode::Incremental).unwrap();
        assert_eq!(plan.sql, "DELETE FROM `Customers` WHERE `id` = ?");
    }

    #[test]
    fn test_empty_payload_rejected() {
        let mut op = row_op(
            "Sales",
            RowOperation::Insert,
            BusinessType::Retail,
            "<row><InvoiceNo>1</InvoiceNo></row>",
        );
        op.payload.clear();
        assert!(build_statement(&op, ApplyMode::Incremental).is_err());
    }
}
