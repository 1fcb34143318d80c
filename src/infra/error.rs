//! Error types for the replication bridge infrastructure
//!
//! One enum covers the whole taxonomy: license refusals, tenant routing,
//! payload validation, target-store failures, and upload reassembly.
//! Classification helpers decide which database errors are worth a pool
//! rebuild, which are retryable, and which are duplicate-key conditions
//! the dispatcher downgrades.

use thiserror::Error;

use crate::domain::PayloadError;

/// Errors that can occur while servicing a session
#[derive(Error, Debug)]
pub enum BridgeError {
    /// License refused or expired; unrecoverable for the session
    #[error("license error ({code}): {message}")]
    License { code: u16, message: String },

    /// Unknown `(store_id, app_id)` pair on a privileged operation
    #[error("routing error: {0}")]
    Routing(String),

    /// Missing primary-key fields, unsupported operation, malformed payload
    #[error("validation error: {0}")]
    Validation(String),

    /// Target-store or tenant-directory failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Chunk reassembly or file persistence failure
    #[error("upload error: {0}")]
    Upload(String),

    /// Bulk load could not run on this server
    #[error("bulk load unavailable: {0}")]
    BulkLoadUnavailable(String),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<PayloadError> for BridgeError {
    fn from(err: PayloadError) -> Self {
        BridgeError::Validation(err.to_string())
    }
}

impl BridgeError {
    /// License expired: HTTP-style code 410 on the wire.
    pub fn license_expired(message: impl Into<String>) -> Self {
        BridgeError::License {
            code: 410,
            message: message.into(),
        }
    }

    /// License lookup failed or credentials missing: code 400.
    pub fn license_invalid(message: impl Into<String>) -> Self {
        BridgeError::License {
            code: 400,
            message: message.into(),
        }
    }

    /// Whether this error is a duplicate-key condition (MySQL 1062).
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            BridgeError::Database(e) => is_duplicate_key_db_error(e),
            _ => false,
        }
    }

    /// Whether the operation is worth retrying after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Database(e) => crate::infra::retry::is_retryable_db_error(e),
            _ => false,
        }
    }
}

/// MySQL duplicate-key diagnostic (ER_DUP_ENTRY).
pub fn is_duplicate_key_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("1062"),
        _ => false,
    }
}

/// Whether a database error looks like a dead or exhausted connection,
/// i.e. the pool should be rebuilt and the operation retried once.
pub fn is_connection_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // Server gone away, lost connection, too many connections
            code == "2006" || code == "2013" || code == "1040"
        }
        _ => false,
    }
}
