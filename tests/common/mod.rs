//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use posbridge::domain::{decode_xml_record, AppId, BusinessType, RowOp, RowOperation, StoreId};

/// Test store ID matching the fixtures below
pub fn test_store_id() -> StoreId {
    StoreId::from("239")
}

/// Test app ID; doubles as the tenant's database name
pub fn test_app_id() -> AppId {
    AppId::from("pos_239")
}

/// Build a row op from an XML wire payload
pub fn row_op_from_xml(
    table: &str,
    op: RowOperation,
    business_type: BusinessType,
    xml: &str,
    sync_id: &str,
) -> RowOp {
    RowOp {
        store_id: test_store_id(),
        app_id: test_app_id(),
        table_name: table.to_string(),
        op,
        payload: decode_xml_record(xml).unwrap(),
        business_type,
        sync_id: sync_id.to_string(),
    }
}

/// A three-row retail stock CSV whose StockId values carry leading zeros
pub fn stock_csv() -> &'static str {
    "StockId,Description,Qty,Price\r\n\
     007,Widget,2,1.50\r\n\
     008,Gadget,5,2.25\r\n\
     009,Sprocket,1,0.75\r\n"
}
