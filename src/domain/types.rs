//! Core type definitions for the replication bridge
//!
//! Tenant identity, business verticals, and the transient operation types
//! that flow from the session layer into the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::payload::FlatRecord;

/// Store identifier as reported by the terminal (e.g. `"239"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Application identifier; doubles as the physical target database name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The vertical a terminal belongs to; governs primary-key policy and the
/// secondary-index bundle applied after table creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessType {
    Retail,
    Hospitality,
}

impl BusinessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessType::Retail => "retail",
            BusinessType::Hospitality => "hospitality",
        }
    }

    /// Parse the wire form; unknown values fall back to retail, matching
    /// the reference client's default vertical.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some(v) if v.eq_ignore_ascii_case("hospitality") => BusinessType::Hospitality,
            _ => BusinessType::Retail,
        }
    }
}

impl fmt::Display for BusinessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Row-level CRUD operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowOperation {
    Insert,
    Update,
    Delete,
}

impl RowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOperation::Insert => "INSERT",
            RowOperation::Update => "UPDATE",
            RowOperation::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(RowOperation::Insert),
            "UPDATE" => Some(RowOperation::Update),
            "DELETE" => Some(RowOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for RowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schema-change operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlOperation {
    #[serde(rename = "DDL_ALTER_TABLE")]
    AlterTable,
    #[serde(rename = "DDL_DROP_TABLE")]
    DropTable,
}

impl DdlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DdlOperation::AlterTable => "DDL_ALTER_TABLE",
            DdlOperation::DropTable => "DDL_DROP_TABLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DDL_ALTER_TABLE" => Some(DdlOperation::AlterTable),
            "DDL_DROP_TABLE" => Some(DdlOperation::DropTable),
            _ => None,
        }
    }
}

impl fmt::Display for DdlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single row-level change, decoded and ready for the dispatcher
#[derive(Debug, Clone)]
pub struct RowOp {
    pub store_id: StoreId,
    pub app_id: AppId,
    pub table_name: String,
    pub op: RowOperation,
    /// Flat column→value map; pre-image values carry an `old_` key prefix
    pub payload: FlatRecord,
    pub business_type: BusinessType,
    pub sync_id: String,
}

/// A schema-change event from a terminal
#[derive(Debug, Clone)]
pub struct DdlOp {
    pub store_id: StoreId,
    pub app_id: AppId,
    pub table_name: String,
    pub operation: DdlOperation,
    pub command: String,
    pub sync_id: String,
}

/// Snapshot of a tenant-directory row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfo {
    pub store_id: StoreId,
    pub store_name: String,
    pub app_id: AppId,
    pub license_expire: DateTime<Utc>,
}

/// Outcome of a license lookup for a `(store_id, app_id)` pair
#[derive(Debug, Clone)]
pub struct LicenseStatus {
    pub valid: bool,
    pub expired: bool,
    /// Whole days until expiry, rounded up; present only when valid
    pub days_remaining: Option<i64>,
    pub store: Option<StoreInfo>,
    pub error: Option<String>,
}

impl LicenseStatus {
    /// Status for an unknown `(store_id, app_id)` pair.
    pub fn not_found() -> Self {
        Self {
            valid: false,
            expired: true,
            days_remaining: None,
            store: None,
            error: Some("store not found or invalid app".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_operation_parse() {
        assert_eq!(RowOperation::parse("INSERT"), Some(RowOperation::Insert));
        assert_eq!(RowOperation::parse("update"), Some(RowOperation::Update));
        assert_eq!(RowOperation::parse("Delete"), Some(RowOperation::Delete));
        assert_eq!(RowOperation::parse("UPSERT"), None);
    }

    #[test]
    fn test_ddl_operation_parse() {
        assert_eq!(
            DdlOperation::parse("DDL_ALTER_TABLE"),
            Some(DdlOperation::AlterTable)
        );
        assert_eq!(
            DdlOperation::parse("DDL_DROP_TABLE"),
            Some(DdlOperation::DropTable)
        );
        assert_eq!(DdlOperation::parse("DDL_CREATE_TABLE"), None);
    }

    #[test]
    fn test_business_type_parse_defaults_to_retail() {
        assert_eq!(
            BusinessType::parse_or_default(Some("hospitality")),
            BusinessType::Hospitality
        );
        assert_eq!(
            BusinessType::parse_or_default(Some("Hospitality")),
            BusinessType::Hospitality
        );
        assert_eq!(
            BusinessType::parse_or_default(Some("retail")),
            BusinessType::Retail
        );
        assert_eq!(BusinessType::parse_or_default(None), BusinessType::Retail);
        assert_eq!(
            BusinessType::parse_or_default(Some("restaurant")),
            BusinessType::Retail
        );
    }

    #[test]
    fn test_license_status_not_found() {
        let status = LicenseStatus::not_found();
        assert!(!status.valid);
        assert!(status.expired);
        assert!(status.store.is_none());
        assert_eq!(
            status.error.as_deref(),
            Some("store not found or invalid app")
        );
    }

    #[test]
    fn test_id_display() {
        assert_eq!(StoreId::from("239").to_string(), "239");
        assert_eq!(AppId::from("pos_239").to_string(), "pos_239");
    }
}
