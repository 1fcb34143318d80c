//! Infrastructure for the replication bridge
//!
//! Tenant directory, target-store access, the row-op dispatcher, the DDL
//! translator, the schema materialiser, and the CSV bootstrap pipeline.

pub mod csv_import;
pub mod ddl;
pub mod error;
pub mod graceful_shutdown;
pub mod retry;
pub mod row_ops;
pub mod schema;
pub mod target;
pub mod tenant;
pub mod uploads;

pub use csv_import::{CsvImporter, ImportOutcome};
pub use error::{BridgeError, Result};
pub use graceful_shutdown::{shutdown_signal, HandlerTracker, ShutdownCoordinator, ShutdownSignal};
pub use retry::{is_retryable_db_error, retry_with_predicate, RetryConfig};
pub use row_ops::{build_statement, ApplyMode, RowOpDispatcher, StatementPlan};
pub use schema::{SchemaMaterialiser, TableSchema};
pub use target::{TargetConfig, TargetStore};
pub use tenant::TenantDirectory;
pub use uploads::{ChunkAccumulator, UploadStore};
