//! posbridge
//!
//! Server side of a client→server database replication bridge for
//! point-of-sale terminals. Terminals stream row-level CRUD deltas, DDL
//! events, and bulk CSV bootstraps over a socket.io-compatible transport;
//! the bridge authorises each session against a tenant directory and
//! materialises the changes into that tenant's MySQL database.
//!
//! ## Modules
//!
//! - [`domain`] - Tenant identity, row/DDL operations, payload decoding
//! - [`infra`] - Tenant directory, target store, dispatcher, DDL
//!   translator, schema materialiser, CSV pipeline
//! - [`session`] - Per-connection state machine and event routing
//! - [`metrics`] - Counter/gauge registry with Prometheus export
//! - [`config`] - Environment-driven configuration
//! - [`server`] - Bootstrap and lifecycle

pub mod config;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    AppId, BusinessType, DdlOp, DdlOperation, FlatRecord, LicenseStatus, RowOp, RowOperation,
    StoreId, StoreInfo,
};
pub use infra::{ApplyMode, BridgeError, Result};
