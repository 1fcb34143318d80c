//! Environment-driven configuration
//!
//! Every tunable reads from the environment with a parse-or-default
//! fallback; nothing here fails except an unparseable listen address at
//! bind time.

use std::net::SocketAddr;
use std::str::FromStr;

use crate::infra::target::TargetConfig;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Transport tunables for the socket layer
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub upgrade_timeout_ms: u64,
    /// Max payload per message; governs single-shot CSV uploads, so the
    /// configured value wins over the transport default.
    pub max_buffer_bytes: u64,
    pub connect_timeout_ms: u64,
}

/// Full-sync and bootstrap tunables
#[derive(Debug, Clone)]
pub struct FullSyncConfig {
    pub batch_size: u64,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
}

/// Tenant-directory connection parameters
#[derive(Debug, Clone)]
pub struct TenantDbConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub socket: SocketConfig,
    pub full_sync: FullSyncConfig,
    pub target: TargetConfig,
    pub tenant_db: TenantDbConfig,
    pub uploads_dir: String,
    /// Grace before closing a session refused by the license gate, so the
    /// peer can observe the reason.
    pub license_grace_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let max_db_connections: u32 = env_or("MAX_DB_CONNECTIONS", 10);

        Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_or("PORT", 3031),
            socket: SocketConfig {
                ping_interval_ms: env_or("SOCKETIO_PING_INTERVAL", 25_000),
                ping_timeout_ms: env_or("SOCKETIO_PING_TIMEOUT", 60_000),
                upgrade_timeout_ms: env_or("SOCKETIO_UPGRADE_TIMEOUT", 10_000),
                max_buffer_bytes: env_or("SOCKETIO_MAX_BUFFER_SIZE", 10_000_000),
                connect_timeout_ms: env_or("SOCKETIO_CONNECT_TIMEOUT", 45_000),
            },
            full_sync: FullSyncConfig {
                batch_size: env_or("FULL_SYNC_BATCH_SIZE", 1_000),
                timeout_ms: env_or("FULL_SYNC_TIMEOUT", 300_000),
                retry_attempts: env_or("FULL_SYNC_RETRY_ATTEMPTS", 3),
            },
            target: TargetConfig {
                host: env_string("TARGET_DB_HOST", "127.0.0.1"),
                port: env_or("TARGET_DB_PORT", 3306),
                username: env_string("TARGET_DB_USER", "root"),
                password: env_string("TARGET_DB_PASSWORD", ""),
                max_connections: max_db_connections,
            },
            tenant_db: TenantDbConfig {
                host: env_string("TENANT_DB_HOST", "127.0.0.1"),
                port: env_or("TENANT_DB_PORT", 3306),
                username: env_string("TENANT_DB_USER", "root"),
                password: env_string("TENANT_DB_PASSWORD", ""),
                database: env_string("TENANT_DB_NAME", "tenant_directory"),
                max_connections: max_db_connections,
            },
            uploads_dir: env_string("UPLOADS_DIR", "uploads"),
            license_grace_ms: env_or("LICENSE_GRACE_MS", 1_000),
        }
    }

    /// The listen address for the HTTP/socket surface.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {}:{}: {e}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Environment-free defaults match the documented values.
        let config = Config::from_env();
        assert_eq!(config.port, 3031);
        assert_eq!(config.socket.ping_interval_ms, 25_000);
        assert_eq!(config.socket.ping_timeout_ms, 60_000);
        assert_eq!(config.socket.max_buffer_bytes, 10_000_000);
        assert_eq!(config.full_sync.batch_size, 1_000);
        assert_eq!(config.full_sync.retry_attempts, 3);
        assert_eq!(config.license_grace_ms, 1_000);
    }

    #[test]
    fn test_listen_addr() {
        let mut config = Config::from_env();
        config.host = "127.0.0.1".to_string();
        config.port = 9999;
        assert_eq!(
            config.listen_addr().unwrap(),
            "127.0.0.1:9999".parse().unwrap()
        );

        config.host = "not an address".to_string();
        assert!(config.listen_addr().is_err());
    }
}
