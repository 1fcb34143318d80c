//! License/Tenant Service
//!
//! Authoritative lookup over the tenant directory. The same row answers
//! both authorisation ("is this pair licensed?") and routing ("which
//! physical database does it map to?"), so a session can never reach the
//! dispatcher without being routable to exactly one database.

use chrono::{DateTime, Duration, Utc};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::debug;

use crate::domain::{AppId, LicenseStatus, StoreId, StoreInfo};
use crate::infra::{BridgeError, Result};

/// Tenant-directory lookup service
pub struct TenantDirectory {
    pool: MySqlPool,
}

impl TenantDirectory {
    /// Create over an existing tenant-directory pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Validate a `(store_id, app_id)` pair against the tenant table.
    pub async fn validate(&self, store_id: &StoreId, app_id: &AppId) -> Result<LicenseStatus> {
        let row = sqlx::query(
            r#"
            SELECT StoreId, StoreName, AdvancedReportAppId, AdvancedReportLicenseExpire
            FROM StoreInfo
            WHERE StoreId = ? AND AdvancedReportAppId = ?
            "#,
        )
        .bind(store_id.as_str())
        .bind(app_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!(store_id = %store_id, app_id = %app_id, "tenant lookup miss");
            return Ok(LicenseStatus::not_found());
        };

        let store = StoreInfo {
            store_id: StoreId::new(row.try_get::<String, _>("StoreId")?),
            store_name: row.try_get::<String, _>("StoreName")?,
            app_id: AppId::new(row.try_get::<String, _>("AdvancedReportAppId")?),
            license_expire: row
                .try_get::<chrono::NaiveDateTime, _>("AdvancedReportLicenseExpire")?
                .and_utc(),
        };

        Ok(license_status(store, Utc::now()))
    }

    /// Resolve the physical database for a pair; `None` when unknown.
    ///
    /// The database name equals the app id whenever the pair exists.
    pub async fn database_for(&self, store_id: &StoreId, app_id: &AppId) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT AdvancedReportAppId FROM StoreInfo WHERE StoreId = ? AND AdvancedReportAppId = ?",
        )
        .bind(store_id.as_str())
        .bind(app_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| r.try_get::<String, _>("AdvancedReportAppId"))
            .transpose()?)
    }

    /// Require a routable database, turning a miss into a routing error.
    pub async fn require_database(&self, store_id: &StoreId, app_id: &AppId) -> Result<String> {
        self.database_for(store_id, app_id).await?.ok_or_else(|| {
            BridgeError::Routing(format!(
                "no database for store {store_id} app {app_id}"
            ))
        })
    }

    /// Round-trip probe against the tenant directory.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Pure license arithmetic, split out so expiry rules are testable
/// without a tenant database.
pub fn license_status(store: StoreInfo, now: DateTime<Utc>) -> LicenseStatus {
    let expired = store.license_expire <= now;
    if expired {
        return LicenseStatus {
            valid: false,
            expired: true,
            days_remaining: None,
            store: Some(store),
            error: Some("license expired".to_string()),
        };
    }

    let remaining = store.license_expire - now;
    // Ceiling in whole days: any partial day counts.
    let secs = remaining.num_seconds();
    let days = (secs + 86_399) / 86_400;

    LicenseStatus {
        valid: true,
        expired: false,
        days_remaining: Some(days),
        store: Some(store),
        error: None,
    }
}
