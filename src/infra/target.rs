//! Target-Store Access Layer
//!
//! Pooled access to the analytical MySQL server, one pool per physical
//! database. Pool creation is idempotent under concurrent first use; a
//! failed liveness probe evicts the pool so the next caller rebuilds it.
//! Also home to the introspection and bulk-load probes the CSV pipeline
//! and schema materialiser lean on.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{MySql, Row};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::infra::error::is_connection_db_error;
use crate::infra::{BridgeError, Result};

/// Connection parameters shared by every per-database pool
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
}

/// Pooled, per-database access to the target server
pub struct TargetStore {
    config: TargetConfig,
    pools: RwLock<HashMap<String, MySqlPool>>,
}

impl TargetStore {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    fn connect_options(&self, database: &str) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.username)
            .password(&self.config.password)
            .database(database)
    }

    async fn build_pool(&self, database: &str) -> Result<MySqlPool> {
        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect_with(self.connect_options(database))
            .await?;
        info!(database, "target pool created");
        Ok(pool)
    }

    /// Get (or create) the pool for a physical database.
    ///
    /// Creation is double-checked under the write lock so concurrent first
    /// use builds exactly one pool.
    pub async fn pool_for(&self, database: &str) -> Result<MySqlPool> {
        if let Some(pool) = self.pools.read().await.get(database) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }
        let pool = self.build_pool(database).await?;
        pools.insert(database.to_string(), pool.clone());
        Ok(pool)
    }

    /// Evict a pool after a liveness failure; the old pool is closed in the
    /// background so in-flight statements may still finish.
    pub async fn evict(&self, database: &str) {
        if let Some(pool) = self.pools.write().await.remove(database) {
            warn!(database, "target pool evicted");
            tokio::spawn(async move { pool.close().await });
        }
    }

    /// Run `op` against the database pool, rebuilding the pool and retrying
    /// once when the failure looks like a dead connection.
    async fn with_pool<T, F, Fut>(&self, database: &str, op: F) -> Result<T>
    where
        F: Fn(MySqlPool) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let pool = self.pool_for(database).await?;
        match op(pool).await {
            Ok(v) => Ok(v),
            Err(e) if is_connection_db_error(&e) => {
                warn!(database, error = %e, "target operation failed, rebuilding pool");
                self.evict(database).await;
                let pool = self.pool_for(database).await?;
                Ok(op(pool).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Execute one parameterised statement; returns affected rows.
    pub async fn execute(&self, database: &str, sql: &str, params: &[Value]) -> Result<u64> {
        self.with_pool(database, |pool| {
            let sql = sql.to_string();
            let params = params.to_vec();
            async move {
                let mut query = sqlx::query(&sql);
                for value in &params {
                    query = bind_value(query, value);
                }
                query.execute(&pool).await.map(|r| r.rows_affected())
            }
        })
        .await
    }

    /// Acquire a dedicated connection, for statements whose follow-ups must
    /// observe the same session (LOAD DATA + SHOW WARNINGS, transactions).
    pub async fn acquire(&self, database: &str) -> Result<PoolConnection<MySql>> {
        let pool = self.pool_for(database).await?;
        match pool.acquire().await {
            Ok(conn) => Ok(conn),
            Err(e) if is_connection_db_error(&e) => {
                self.evict(database).await;
                let pool = self.pool_for(database).await?;
                Ok(pool.acquire().await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a table name case-insensitively against the live schema.
    pub async fn resolve_table_name(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Option<String>> {
        let rows = self
            .with_pool(database, |pool| {
                let database = database.to_string();
                async move {
                    sqlx::query(
                        "SELECT TABLE_NAME FROM information_schema.TABLES WHERE TABLE_SCHEMA = ?",
                    )
                    .bind(&database)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;

        for row in rows {
            let name: String = row.try_get("TABLE_NAME")?;
            if name.eq_ignore_ascii_case(table) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Row count for a table; the name must already be resolved.
    pub async fn row_count(&self, database: &str, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {}", quote_ident(table));
        let row = self
            .with_pool(database, |pool| {
                let sql = sql.clone();
                async move { sqlx::query(&sql).fetch_one(&pool).await }
            })
            .await?;
        Ok(row.try_get::<i64, _>("cnt")? as u64)
    }

    /// Ordered column list via `SHOW COLUMNS`, falling back to the
    /// information schema when the fast path fails.
    pub async fn table_columns(&self, database: &str, table: &str) -> Result<Vec<String>> {
        let show = format!("SHOW COLUMNS FROM {}", quote_ident(table));
        let fast = self
            .with_pool(database, |pool| {
                let show = show.clone();
                async move { sqlx::query(&show).fetch_all(&pool).await }
            })
            .await;

        match fast {
            Ok(rows) => rows
                .iter()
                .map(|r| r.try_get::<String, _>("Field").map_err(BridgeError::from))
                .collect(),
            Err(e) => {
                warn!(database, table, error = %e, "SHOW COLUMNS failed, using information_schema");
                let rows = self
                    .with_pool(database, |pool| {
                        let database = database.to_string();
                        let table = table.to_string();
                        async move {
                            sqlx::query(
                                "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
                                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                                 ORDER BY ORDINAL_POSITION",
                            )
                            .bind(&database)
                            .bind(&table)
                            .fetch_all(&pool)
                            .await
                        }
                    })
                    .await?;
                rows.iter()
                    .map(|r| r.try_get::<String, _>("COLUMN_NAME").map_err(BridgeError::from))
                    .collect()
            }
        }
    }

    /// All table names in the database.
    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let rows = self
            .with_pool(database, |pool| {
                let database = database.to_string();
                async move {
                    sqlx::query(
                        "SELECT TABLE_NAME FROM information_schema.TABLES \
                         WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'",
                    )
                    .bind(&database)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("TABLE_NAME").map_err(BridgeError::from))
            .collect()
    }

    /// Whether the server advertises `local_infile`.
    pub async fn local_infile_enabled(&self, database: &str) -> Result<bool> {
        Ok(self
            .server_variable(database, "local_infile")
            .await?
            .map(|v| v.eq_ignore_ascii_case("ON") || v == "1")
            .unwrap_or(false))
    }

    /// The server's `secure_file_priv` directory, when configured.
    pub async fn secure_file_priv(&self, database: &str) -> Result<Option<String>> {
        Ok(self
            .server_variable(database, "secure_file_priv")
            .await?
            .filter(|v| !v.is_empty() && v != "NULL"))
    }

    async fn server_variable(&self, database: &str, name: &str) -> Result<Option<String>> {
        let sql = format!("SHOW VARIABLES LIKE '{name}'");
        let row = self
            .with_pool(database, |pool| {
                let sql = sql.clone();
                async move { sqlx::query(&sql).fetch_optional(&pool).await }
            })
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("Value")).transpose()?)
    }

    /// Drop the given tables inside one transaction, with foreign-key
    /// checks toggled off for its duration. Any failure rolls back.
    pub async fn clear_tables(&self, database: &str, tables: &[String]) -> Result<u64> {
        let mut conn = self.acquire(database).await?;
        let mut tx = sqlx::Connection::begin(&mut *conn).await?;

        sqlx::query("SET FOREIGN_KEY_CHECKS = 0")
            .execute(&mut *tx)
            .await?;

        let mut dropped = 0u64;
        for table in tables {
            let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
            match sqlx::query(&sql).execute(&mut *tx).await {
                Ok(_) => dropped += 1,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            }
        }

        sqlx::query("SET FOREIGN_KEY_CHECKS = 1")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(dropped)
    }

    /// Close every pool; used at shutdown.
    pub async fn close(&self) {
        let mut pools = self.pools.write().await;
        for (database, pool) in pools.drain() {
            info!(database, "closing target pool");
            pool.close().await;
        }
    }
}

/// Backtick-quote an identifier for the target dialect.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Bind one JSON scalar onto a query. Arrays and objects are bound as
/// their JSON text; the target column is expected to be textual.
pub fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u as i64)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Sales"), "`Sales`");
        assert_eq!(quote_ident("weird`name"), "`weird``name`");
    }

    #[test]
    fn test_target_config_options() {
        let store = TargetStore::new(TargetConfig {
            host: "db.internal".to_string(),
            port: 3307,
            username: "bridge".to_string(),
            password: "secret".to_string(),
            max_connections: 4,
        });
        // Options are derived per database; just exercise the builder path.
        let opts = store.connect_options("pos_239");
        let _ = opts;
    }
}
