//! Server bootstrap
//!
//! Wires together configuration, the tenant directory, the target-store
//! pool registry, the socket layer, and the axum router, then serves until
//! SIGINT/SIGTERM. Shutdown closes the listener, drains in-flight session
//! handlers, and closes every pool.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use socketioxide::{SocketIo, TransportType};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::infra::{
    shutdown_signal, CsvImporter, RowOpDispatcher, SchemaMaterialiser, ShutdownCoordinator,
    TargetStore, TenantDirectory, UploadStore,
};
use crate::metrics::MetricsRegistry;
use crate::session::{self, SessionContext};

/// State for the plain HTTP endpoints
#[derive(Clone)]
struct AppState {
    tenants: Arc<TenantDirectory>,
    metrics: Arc<MetricsRegistry>,
}

/// Start the server and block until shutdown.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("starting posbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_env());
    let addr = config.listen_addr()?;
    info!("  listen address: {addr}");
    info!("  uploads dir: {}", config.uploads_dir);
    info!(
        "  socket: ping {}ms/{}ms, upgrade {}ms, max payload {} bytes",
        config.socket.ping_interval_ms,
        config.socket.ping_timeout_ms,
        config.socket.upgrade_timeout_ms,
        config.socket.max_buffer_bytes
    );
    info!(
        "  full sync: {} rows per batch, {}ms timeout, {} retries",
        config.full_sync.batch_size, config.full_sync.timeout_ms, config.full_sync.retry_attempts
    );

    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    // Tenant directory connection
    info!("connecting to tenant directory {}", config.tenant_db.host);
    let tenant_options = MySqlConnectOptions::new()
        .host(&config.tenant_db.host)
        .port(config.tenant_db.port)
        .username(&config.tenant_db.username)
        .password(&config.tenant_db.password)
        .database(&config.tenant_db.database);
    let tenant_pool = MySqlPoolOptions::new()
        .max_connections(config.tenant_db.max_connections)
        .connect_with(tenant_options)
        .await?;
    let tenants = Arc::new(TenantDirectory::new(tenant_pool));
    info!("tenant directory connected");

    // Core services
    let target = Arc::new(TargetStore::new(config.target.clone()));
    let dispatcher = Arc::new(RowOpDispatcher::new(tenants.clone(), target.clone()));
    let materialiser = Arc::new(SchemaMaterialiser::new(target.clone()));
    let importer = Arc::new(CsvImporter::new(target.clone()));
    let uploads = Arc::new(UploadStore::new(&config.uploads_dir));
    let metrics = Arc::new(MetricsRegistry::new());
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let ctx = SessionContext {
        config: config.clone(),
        tenants: tenants.clone(),
        target: target.clone(),
        dispatcher,
        materialiser,
        importer,
        uploads,
        metrics: metrics.clone(),
        tracker: coordinator.tracker(),
    };

    // Socket layer: the configured payload cap governs single-shot CSV
    // uploads, so it must override the transport default.
    let (socket_layer, io) = SocketIo::builder()
        .ping_interval(Duration::from_millis(config.socket.ping_interval_ms))
        .ping_timeout(Duration::from_millis(config.socket.ping_timeout_ms))
        .connect_timeout(Duration::from_millis(config.socket.connect_timeout_ms))
        .max_payload(config.socket.max_buffer_bytes)
        .transports([TransportType::Polling, TransportType::Websocket])
        .with_state(ctx)
        .build_layer();
    session::register(&io);

    let app_state = AppState {
        tenants: tenants.clone(),
        metrics,
    };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(app_state)
        .layer(socket_layer)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("posbridge is ready to accept connections");

    let shutdown_coordinator = coordinator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_coordinator.shutdown();
        })
        .await?;

    // Listener closed; drain in-flight handlers, then release pools.
    coordinator.graceful_shutdown(Duration::from_secs(30)).await;
    target.close().await;
    tenants.close().await;
    info!("posbridge stopped");

    Ok(())
}

fn init_tracing() {
    let default_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "posbridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check endpoint: round-trips the tenant directory.
async fn readiness_check(
    State(state): State<AppState>,
) -> Result<axum::Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    match state.tenants.health_check().await {
        Ok(()) => Ok(axum::Json(serde_json::json!({
            "status": "ready",
            "tenantDirectory": "connected",
        }))),
        Err(e) => Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("tenant directory unavailable: {e}"),
        )),
    }
}

/// Prometheus metrics endpoint.
async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.metrics.to_prometheus().await
}
