//! Wire event payloads
//!
//! Serde shapes for every peer→server event. Handlers receive the raw
//! JSON value and parse here, so malformed payloads surface as per-event
//! validation errors instead of silently dropped events.

use serde::Deserialize;
use serde_json::Value;

use crate::infra::{BridgeError, Result};

fn parse<T: serde::de::DeserializeOwned>(event: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| BridgeError::Validation(format!("malformed {event} payload: {e}")))
}

/// `identify{storeId, appId, serviceType}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
}

impl IdentifyPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("identify", value)
    }
}

/// `sync_data{...}`; also the element shape of `batch_sync`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDataPayload {
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    pub table_name: String,
    pub operation: String,
    pub record_data: Value,
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl SyncDataPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("sync_data", value)
    }
}

/// `batch_sync[RowOp…]`, either a bare array or `{operations: [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchSyncPayload {
    Operations(Vec<SyncDataPayload>),
    Wrapped { operations: Vec<SyncDataPayload> },
}

impl BatchSyncPayload {
    pub fn from_value(value: Value) -> Result<Vec<SyncDataPayload>> {
        let parsed: BatchSyncPayload = parse("batch_sync", value)?;
        Ok(match parsed {
            BatchSyncPayload::Operations(ops) => ops,
            BatchSyncPayload::Wrapped { operations } => operations,
        })
    }
}

/// `sync_ddl_operation{storeId, appId, tableName, operation, sqlCommand, syncId}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlSyncPayload {
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    pub table_name: String,
    pub operation: String,
    pub sql_command: String,
    #[serde(default)]
    pub sync_id: Option<String>,
}

impl DdlSyncPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("sync_ddl_operation", value)
    }
}

/// `verify_and_sync_table{tableName, batchSize, rowCount?}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTablePayload {
    pub table_name: String,
    #[serde(default)]
    pub batch_size: Option<u64>,
    /// Row count on the terminal side, when the client volunteers it
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub sync_id: Option<String>,
}

impl VerifyTablePayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("verify_and_sync_table", value)
    }
}

/// `create_table_from_schema{tableName, schema, isInitialSync, databaseType}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTablePayload {
    pub table_name: String,
    pub schema: Value,
    #[serde(default)]
    pub is_initial_sync: bool,
    #[serde(default)]
    pub database_type: Option<String>,
    #[serde(default)]
    pub sync_id: Option<String>,
}

impl CreateTablePayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("create_table_from_schema", value)
    }
}

/// `table_schema_response{tableName, schema, originalSyncId}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchemaResponsePayload {
    pub table_name: String,
    pub schema: Value,
    #[serde(default)]
    pub original_sync_id: Option<String>,
    #[serde(default)]
    pub database_type: Option<String>,
}

impl TableSchemaResponsePayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("table_schema_response", value)
    }
}

/// `full_data_sync_response` / `initial_sync_data_response`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSyncBatchPayload {
    pub table_name: String,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub current_batch: Option<u64>,
    #[serde(default)]
    pub total_batches: Option<u64>,
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default)]
    pub is_last_batch: bool,
    #[serde(default)]
    pub original_sync_id: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
}

impl DataSyncBatchPayload {
    pub fn from_value(event: &str, value: Value) -> Result<Self> {
        parse(event, value)
    }
}

/// `force_sync_request{action}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSyncPayload {
    pub action: String,
    #[serde(default)]
    pub sync_id: Option<String>,
}

impl ForceSyncPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("force_sync_request", value)
    }
}

/// `clear_database_tables{tables?}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearTablesPayload {
    /// Explicit tables to drop; every table in the database when absent
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub sync_id: Option<String>,
}

impl ClearTablesPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("clear_database_tables", value)
    }
}

/// `csv_bulk_upload{tableName, fileName, fileContent, fileSizeBytes, rowCount}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvUploadPayload {
    pub table_name: String,
    pub file_name: String,
    pub file_content: String,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

impl CsvUploadPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("csv_bulk_upload", value)
    }
}

/// `csv_bulk_upload_start{fileName, totalChunks, fileSizeBytes, rowCount}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvUploadStartPayload {
    pub table_name: String,
    pub file_name: String,
    pub total_chunks: u32,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

impl CsvUploadStartPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("csv_bulk_upload_start", value)
    }
}

/// `csv_bulk_upload_chunk{fileName, chunkIndex, totalChunks, chunkContent, isLastChunk}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvUploadChunkPayload {
    #[serde(default)]
    pub table_name: Option<String>,
    pub file_name: String,
    pub chunk_index: u32,
    #[serde(default)]
    pub total_chunks: Option<u32>,
    pub chunk_content: String,
    #[serde(default)]
    pub is_last_chunk: bool,
}

impl CsvUploadChunkPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        parse("csv_bulk_upload_chunk", value)
    }
}
