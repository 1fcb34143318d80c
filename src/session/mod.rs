//! Session Controller
//!
//! One state machine per connected terminal. A session binds its tenant
//! identity through `identify` (with the license gate for
//! `advanced_online_report` clients), then routes row, DDL, schema and
//! bootstrap events into the dispatcher. Events for one session are
//! processed in arrival order; sessions run concurrently.

mod events;
mod state;

pub use events::*;
pub use state::{SessionState, UploadKey};

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef, State};
use socketioxide::SocketIo;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{
    decode_record, AppId, BusinessType, DdlOp, DdlOperation, RowOp, RowOperation, StoreId,
};
use crate::infra::uploads::ChunkAccumulator;
use crate::infra::{
    ddl, retry_with_predicate, ApplyMode, BridgeError, CsvImporter, HandlerTracker, Result,
    RetryConfig, RowOpDispatcher, SchemaMaterialiser, TableSchema, TargetStore, TenantDirectory,
    UploadStore,
};
use crate::metrics::{self, MetricsRegistry};

/// Service type that is subject to the license gate.
const LICENSED_SERVICE: &str = "advanced_online_report";

/// Shared dependencies handed to every session handler
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub tenants: Arc<TenantDirectory>,
    pub target: Arc<TargetStore>,
    pub dispatcher: Arc<RowOpDispatcher>,
    pub materialiser: Arc<SchemaMaterialiser>,
    pub importer: Arc<CsvImporter>,
    pub uploads: Arc<UploadStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub tracker: Arc<HandlerTracker>,
}

/// Register the root namespace on the socket layer.
pub fn register(io: &SocketIo) {
    io.ns("/", on_connect);
}

async fn on_connect(socket: SocketRef, State(ctx): State<SessionContext>) {
    info!(socket_id = %socket.id, "session connected");
    socket.extensions.insert(SessionState::new());

    ctx.metrics.inc_counter(metrics::SESSIONS_TOTAL).await;
    ctx.metrics.add_gauge(metrics::SESSIONS_ACTIVE, 1).await;

    socket.on("identify", on_identify);
    socket.on("sync_data", on_sync_data);
    socket.on("batch_sync", on_batch_sync);
    socket.on("sync_ddl_operation", on_sync_ddl);
    socket.on("verify_and_sync_table", on_verify_table);
    socket.on("create_table_from_schema", on_create_table);
    socket.on("table_schema_response", on_table_schema_response);
    socket.on("full_data_sync_response", on_full_data_sync_response);
    socket.on("initial_sync_data_response", on_initial_sync_response);
    socket.on("force_sync_request", on_force_sync);
    socket.on("clear_database_tables", on_clear_tables);
    socket.on("csv_bulk_upload", on_csv_upload);
    socket.on("csv_bulk_upload_start", on_csv_upload_start);
    socket.on("csv_bulk_upload_chunk", on_csv_upload_chunk);
    socket.on("ping", on_ping);
    socket.on_disconnect(on_disconnect);
}

async fn on_disconnect(socket: SocketRef, State(ctx): State<SessionContext>) {
    if let Some(state) = socket.extensions.get::<SessionState>() {
        let pending = state.pending_upload_count();
        if pending > 0 {
            warn!(socket_id = %socket.id, pending, "dropping pending chunk uploads");
        }
        state.clear();
    }
    ctx.metrics.add_gauge(metrics::SESSIONS_ACTIVE, -1).await;
    info!(socket_id = %socket.id, "session disconnected");
}

// ============================================================================
// Helpers
// ============================================================================

fn session(socket: &SocketRef) -> SessionState {
    socket
        .extensions
        .get::<SessionState>()
        .unwrap_or_default()
}

fn emit(socket: &SocketRef, event: &str, value: Value) {
    if let Err(e) = socket.emit(event, &value) {
        debug!(socket_id = %socket.id, event, error = %e, "emit to closed peer dropped");
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Reject privileged events until identification has bound the tenant.
fn require_identity(socket: &SocketRef, state: &SessionState) -> Option<(StoreId, AppId)> {
    match state.identity() {
        Some(identity) => Some(identity),
        None => {
            emit(
                socket,
                "identification_error",
                json!({"message": "session is not identified"}),
            );
            None
        }
    }
}

fn disconnect_after_grace(socket: &SocketRef, grace_ms: u64) {
    let socket = socket.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(grace_ms)).await;
        socket.disconnect().ok();
    });
}

/// Build a dispatcher-ready row op from a wire payload.
fn row_op_from(payload: &SyncDataPayload, store_id: &StoreId, app_id: &AppId) -> Result<RowOp> {
    let op = RowOperation::parse(&payload.operation).ok_or_else(|| {
        BridgeError::Validation(format!("unsupported operation {:?}", payload.operation))
    })?;
    let record = decode_record(&payload.record_data)?;

    Ok(RowOp {
        store_id: store_id.clone(),
        app_id: app_id.clone(),
        table_name: payload.table_name.clone(),
        op,
        payload: record,
        business_type: BusinessType::parse_or_default(payload.business_type.as_deref()),
        sync_id: payload.sync_id.clone().unwrap_or_default(),
    })
}

// ============================================================================
// Identification and license gate
// ============================================================================

async fn on_identify(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);

    let payload = match IdentifyPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "identification_error",
                json!({"message": e.to_string()}),
            );
            disconnect_after_grace(&socket, ctx.config.license_grace_ms);
            return;
        }
    };

    let (Some(store), Some(app), Some(service)) =
        (payload.store_id, payload.app_id, payload.service_type)
    else {
        emit(
            &socket,
            "identification_error",
            json!({"message": "storeId, appId and serviceType are required"}),
        );
        disconnect_after_grace(&socket, ctx.config.license_grace_ms);
        return;
    };

    let store_id = StoreId::new(store);
    let app_id = AppId::new(app);

    if service != LICENSED_SERVICE {
        // Legacy sessions bind tenant fields without the license gate.
        state.bind_identity(store_id.clone(), app_id.clone(), Some(service), None);
        info!(socket_id = %socket.id, store_id = %store_id, app_id = %app_id,
            "legacy session identified");
        emit(&socket, "identified", json!({"success": true}));
        return;
    }

    match ctx.tenants.validate(&store_id, &app_id).await {
        Err(e) => {
            error!(store_id = %store_id, app_id = %app_id, error = %e, "license lookup failed");
            refuse_license(
                &socket,
                &ctx,
                BridgeError::license_invalid("license lookup failed"),
                json!({}),
            )
            .await;
        }
        Ok(status) if status.store.is_none() => {
            refuse_license(
                &socket,
                &ctx,
                BridgeError::license_invalid(
                    status
                        .error
                        .unwrap_or_else(|| "store not found or invalid app".into()),
                ),
                json!({}),
            )
            .await;
        }
        Ok(status) if status.expired => {
            let store = status.store.as_ref();
            info!(store_id = %store_id, app_id = %app_id, "license expired");
            refuse_license(
                &socket,
                &ctx,
                BridgeError::license_expired("license expired"),
                json!({
                    "storeName": store.map(|s| s.store_name.clone()),
                    "licenseExpire": store.map(|s| s.license_expire.to_rfc3339()),
                }),
            )
            .await;
        }
        Ok(status) => {
            state.bind_identity(
                store_id.clone(),
                app_id.clone(),
                Some(service),
                status.days_remaining,
            );
            info!(socket_id = %socket.id, store_id = %store_id, app_id = %app_id,
                days_remaining = status.days_remaining, "session identified");
            emit(
                &socket,
                "identified",
                json!({
                    "success": true,
                    "storeName": status.store.map(|s| s.store_name),
                    "daysRemaining": status.days_remaining,
                }),
            );
        }
    }
}

/// Emit the license refusal event matching the error code, then close the
/// session after the configured grace so the peer can observe the reason.
async fn refuse_license(
    socket: &SocketRef,
    ctx: &SessionContext,
    refusal: BridgeError,
    details: Value,
) {
    ctx.metrics.inc_counter(metrics::LICENSE_REFUSALS).await;
    if let BridgeError::License { code, message } = &refusal {
        let event = if *code == 410 {
            "license_expired"
        } else {
            "license_error"
        };
        let mut body = json!({"code": code, "message": message});
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), details.as_object()) {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }
        emit(socket, event, body);
    }
    disconnect_after_grace(socket, ctx.config.license_grace_ms);
}

async fn on_ping(socket: SocketRef, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    emit(&socket, "pong", json!({"timestamp": now_rfc3339()}));
}

// ============================================================================
// Incremental row path
// ============================================================================

async fn on_sync_data(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let sync_id = value
        .get("syncId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let outcome = apply_sync_data(&ctx, &store_id, &app_id, value).await;
    match outcome {
        Ok(affected) => {
            ctx.metrics.inc_counter(metrics::ROWS_APPLIED).await;
            emit(
                &socket,
                "sync_response",
                json!({
                    "syncId": sync_id,
                    "success": true,
                    "result": {"affectedRows": affected},
                    "timestamp": now_rfc3339(),
                }),
            );
        }
        Err(e) => {
            warn!(store_id = %store_id, sync_id, error = %e, "sync_data failed");
            ctx.metrics.inc_counter(metrics::ROW_OP_ERRORS).await;
            emit(
                &socket,
                "sync_response",
                json!({
                    "syncId": sync_id,
                    "success": false,
                    "error": e.to_string(),
                    "timestamp": now_rfc3339(),
                }),
            );
        }
    }
}

async fn apply_sync_data(
    ctx: &SessionContext,
    store_id: &StoreId,
    app_id: &AppId,
    value: Value,
) -> Result<u64> {
    let payload = SyncDataPayload::from_value(value)?;
    let op = row_op_from(&payload, store_id, app_id)?;
    ctx.dispatcher.apply(&op, ApplyMode::Incremental).await
}

async fn on_batch_sync(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let operations = match BatchSyncPayload::from_value(value) {
        Ok(ops) => ops,
        Err(e) => {
            emit(
                &socket,
                "batch_sync_response",
                json!({"success": false, "error": e.to_string(), "timestamp": now_rfc3339()}),
            );
            return;
        }
    };

    let mut results = Vec::with_capacity(operations.len());
    let mut failed = 0u64;

    // Arrival order is preserved: operations apply one at a time.
    for payload in &operations {
        let sync_id = payload.sync_id.clone().unwrap_or_default();
        let outcome = match row_op_from(payload, &store_id, &app_id) {
            Ok(op) => ctx.dispatcher.apply(&op, ApplyMode::Incremental).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(affected) => {
                ctx.metrics.inc_counter(metrics::ROWS_APPLIED).await;
                results.push(json!({"syncId": sync_id, "success": true, "affectedRows": affected}));
            }
            Err(e) => {
                failed += 1;
                ctx.metrics.inc_counter(metrics::ROW_OP_ERRORS).await;
                results.push(json!({"syncId": sync_id, "success": false, "error": e.to_string()}));
            }
        }
    }

    emit(
        &socket,
        "batch_sync_response",
        json!({
            "success": failed == 0,
            "processed": operations.len() as u64 - failed,
            "failed": failed,
            "results": results,
            "timestamp": now_rfc3339(),
        }),
    );
}

// ============================================================================
// DDL path
// ============================================================================

async fn on_sync_ddl(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match DdlSyncPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(&socket, "ddl_sync_error", json!({"error": e.to_string()}));
            return;
        }
    };
    let sync_id = payload.sync_id.clone().unwrap_or_default();

    let Some(operation) = DdlOperation::parse(&payload.operation) else {
        emit(
            &socket,
            "ddl_sync_error",
            json!({
                "syncId": sync_id,
                "error": format!("unsupported DDL operation {:?}", payload.operation),
            }),
        );
        return;
    };

    let op = DdlOp {
        store_id: store_id.clone(),
        app_id: app_id.clone(),
        table_name: payload.table_name.clone(),
        operation,
        command: payload.sql_command.clone(),
        sync_id: sync_id.clone(),
    };

    let translated = ddl::translate(op.operation, &op.table_name, &op.command);
    let Some(sql) = translated else {
        // Not representable in the target dialect; skipping counts as done.
        debug!(table = %op.table_name, "ddl skipped");
        ctx.metrics.inc_counter(metrics::DDL_SKIPPED).await;
        emit(
            &socket,
            "ddl_sync_success",
            json!({"syncId": sync_id, "skipped": true}),
        );
        return;
    };

    let outcome = async {
        let database = ctx.tenants.require_database(&op.store_id, &op.app_id).await?;
        ctx.target.execute(&database, &sql, &[]).await
    }
    .await;

    match outcome {
        Ok(_) => {
            info!(store_id = %op.store_id, table = %op.table_name, "ddl applied");
            ctx.metrics.inc_counter(metrics::DDL_APPLIED).await;
            emit(
                &socket,
                "ddl_sync_success",
                json!({"syncId": sync_id, "skipped": false}),
            );
        }
        Err(e) => {
            warn!(store_id = %op.store_id, table = %op.table_name, error = %e, "ddl failed");
            emit(
                &socket,
                "ddl_sync_error",
                json!({"syncId": sync_id, "error": e.to_string()}),
            );
        }
    }
}

// ============================================================================
// Verify / schema / bootstrap negotiation
// ============================================================================

async fn on_verify_table(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match VerifyTablePayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "verify_and_sync_response",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let outcome = async {
        let database = ctx.tenants.require_database(&store_id, &app_id).await?;
        let resolved = ctx
            .target
            .resolve_table_name(&database, &payload.table_name)
            .await?;
        let row_count = match &resolved {
            Some(actual) => ctx.target.row_count(&database, actual).await?,
            None => 0,
        };
        Ok::<_, BridgeError>((resolved.is_some(), row_count))
    }
    .await;

    let (exists, row_count) = match outcome {
        Ok(v) => v,
        Err(e) => {
            warn!(table = %payload.table_name, error = %e, "verify failed");
            emit(
                &socket,
                "verify_and_sync_response",
                json!({"tableName": payload.table_name, "success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let needs_sync = !exists || row_count == 0;
    let batch_size = payload
        .batch_size
        .unwrap_or(ctx.config.full_sync.batch_size);
    // CSV bootstrap pays off once a full sync would take several batches.
    let use_csv_sync =
        needs_sync && payload.row_count.is_some_and(|declared| declared > batch_size);

    emit(
        &socket,
        "verify_and_sync_response",
        json!({
            "tableName": payload.table_name,
            "exists": exists,
            "needsSync": needs_sync,
            "rowCount": row_count,
            "useCSVSync": use_csv_sync,
        }),
    );

    if !exists {
        emit(
            &socket,
            "request_table_schema",
            json!({"tableName": payload.table_name, "originalSyncId": payload.sync_id}),
        );
    } else if needs_sync && use_csv_sync {
        emit(
            &socket,
            "csv_bulk_sync_request",
            json!({"tableName": payload.table_name, "originalSyncId": payload.sync_id}),
        );
    } else if needs_sync {
        emit(
            &socket,
            "request_full_data_sync",
            json!({
                "tableName": payload.table_name,
                "originalSyncId": payload.sync_id,
                "batchSize": batch_size,
            }),
        );
    }
}

async fn create_table_from_value(
    ctx: &SessionContext,
    store_id: &StoreId,
    app_id: &AppId,
    table_name: &str,
    schema: Value,
    database_type: Option<&str>,
) -> Result<()> {
    let schema: TableSchema = serde_json::from_value(schema)
        .map_err(|e| BridgeError::Validation(format!("malformed schema descriptor: {e}")))?;
    let business_type = database_type.map(|s| BusinessType::parse_or_default(Some(s)));

    let database = ctx.tenants.require_database(store_id, app_id).await?;
    ctx.materialiser
        .create_table(&database, table_name, &schema, business_type)
        .await
}

async fn on_create_table(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match CreateTablePayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "table_created",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let outcome = create_table_from_value(
        &ctx,
        &store_id,
        &app_id,
        &payload.table_name,
        payload.schema.clone(),
        payload.database_type.as_deref(),
    )
    .await;

    match outcome {
        Ok(()) => {
            ctx.metrics.inc_counter(metrics::TABLES_CREATED).await;
            emit(
                &socket,
                "table_created",
                json!({"tableName": payload.table_name, "success": true}),
            );
            if payload.is_initial_sync {
                emit(
                    &socket,
                    "request_full_data_sync",
                    json!({
                        "tableName": payload.table_name,
                        "originalSyncId": payload.sync_id,
                        "batchSize": ctx.config.full_sync.batch_size,
                    }),
                );
            }
        }
        Err(e) => {
            warn!(table = %payload.table_name, error = %e, "create table failed");
            emit(
                &socket,
                "table_created",
                json!({"tableName": payload.table_name, "success": false, "error": e.to_string()}),
            );
        }
    }
}

async fn on_table_schema_response(
    socket: SocketRef,
    Data(value): Data<Value>,
    State(ctx): State<SessionContext>,
) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match TableSchemaResponsePayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "table_created",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let outcome = create_table_from_value(
        &ctx,
        &store_id,
        &app_id,
        &payload.table_name,
        payload.schema.clone(),
        payload.database_type.as_deref(),
    )
    .await;

    match outcome {
        Ok(()) => {
            ctx.metrics.inc_counter(metrics::TABLES_CREATED).await;
            emit(
                &socket,
                "table_created",
                json!({"tableName": payload.table_name, "success": true}),
            );
            // The table was missing during verification; ask for its data.
            emit(
                &socket,
                "request_full_data_sync",
                json!({
                    "tableName": payload.table_name,
                    "originalSyncId": payload.original_sync_id,
                    "batchSize": ctx.config.full_sync.batch_size,
                }),
            );
        }
        Err(e) => {
            warn!(table = %payload.table_name, error = %e, "create table from schema response failed");
            emit(
                &socket,
                "table_created",
                json!({"tableName": payload.table_name, "success": false, "error": e.to_string()}),
            );
        }
    }
}

// ============================================================================
// Row-bootstrap path (legacy full sync)
// ============================================================================

async fn on_full_data_sync_response(
    socket: SocketRef,
    Data(value): Data<Value>,
    State(ctx): State<SessionContext>,
) {
    apply_data_batch(socket, ctx, value, "full_data_sync_response").await;
}

async fn on_initial_sync_response(
    socket: SocketRef,
    Data(value): Data<Value>,
    State(ctx): State<SessionContext>,
) {
    apply_data_batch(socket, ctx, value, "initial_sync_data_response").await;
}

async fn apply_data_batch(socket: SocketRef, ctx: SessionContext, value: Value, event: &str) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let (progress_event, complete_event) = if event == "initial_sync_data_response" {
        ("initial_sync_progress", "initial_sync_complete")
    } else {
        ("full_data_sync_progress", "full_data_sync_complete")
    };

    let payload = match DataSyncBatchPayload::from_value(event, value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                progress_event,
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    state.set_full_sync_active(true);
    let business_type = BusinessType::parse_or_default(payload.business_type.as_deref());
    let retry_config = RetryConfig::full_sync(ctx.config.full_sync.retry_attempts);

    let mut applied = 0u64;
    let mut failed = 0u64;
    for row in &payload.data {
        let outcome = async {
            let record = decode_record(row)?;
            let op = RowOp {
                store_id: store_id.clone(),
                app_id: app_id.clone(),
                table_name: payload.table_name.clone(),
                op: RowOperation::Insert,
                payload: record,
                business_type,
                sync_id: payload.original_sync_id.clone().unwrap_or_default(),
            };
            // Bootstrap mode: a row that already exists is skipped, keeping
            // repeated bootstraps idempotent.
            retry_with_predicate(
                &retry_config,
                "bootstrap_row",
                || ctx.dispatcher.apply(&op, ApplyMode::Bootstrap),
                BridgeError::is_retryable,
            )
            .await
        }
        .await;

        match outcome {
            Ok(_) => applied += 1,
            Err(e) => {
                failed += 1;
                warn!(table = %payload.table_name, error = %e, "bootstrap row failed");
            }
        }
    }

    ctx.metrics.add_counter(metrics::ROWS_APPLIED, applied).await;

    emit(
        &socket,
        progress_event,
        json!({
            "tableName": payload.table_name,
            "currentBatch": payload.current_batch,
            "totalBatches": payload.total_batches,
            "rowsProcessed": applied,
            "rowsFailed": failed,
        }),
    );

    if payload.is_last_batch {
        state.set_full_sync_active(false);
        info!(store_id = %store_id, table = %payload.table_name, "bootstrap complete");
        emit(
            &socket,
            complete_event,
            json!({
                "tableName": payload.table_name,
                "totalRows": payload.total_rows,
                "originalSyncId": payload.original_sync_id,
            }),
        );
    }
}

// ============================================================================
// Destructive maintenance
// ============================================================================

async fn on_force_sync(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match ForceSyncPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "force_sync_response",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    if payload.action != "drop_all_tables" {
        emit(
            &socket,
            "force_sync_response",
            json!({"success": false, "error": format!("unsupported action {:?}", payload.action)}),
        );
        return;
    }

    let outcome = async {
        let database = ctx.tenants.require_database(&store_id, &app_id).await?;
        let tables = ctx.target.list_tables(&database).await?;
        let dropped = ctx.target.clear_tables(&database, &tables).await?;
        Ok::<_, BridgeError>(dropped)
    }
    .await;

    match outcome {
        Ok(dropped) => {
            info!(store_id = %store_id, app_id = %app_id, dropped, "force sync dropped all tables");
            emit(
                &socket,
                "force_sync_response",
                json!({"success": true, "droppedTables": dropped, "syncId": payload.sync_id}),
            );
        }
        Err(e) => {
            error!(store_id = %store_id, app_id = %app_id, error = %e, "force sync failed");
            emit(
                &socket,
                "force_sync_response",
                json!({"success": false, "error": e.to_string(), "syncId": payload.sync_id}),
            );
        }
    }
}

async fn on_clear_tables(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match ClearTablesPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "clear_database_response",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let outcome = async {
        let database = ctx.tenants.require_database(&store_id, &app_id).await?;
        let tables = match payload.tables.clone() {
            Some(tables) if !tables.is_empty() => tables,
            _ => ctx.target.list_tables(&database).await?,
        };
        let dropped = ctx.target.clear_tables(&database, &tables).await?;
        Ok::<_, BridgeError>(dropped)
    }
    .await;

    match outcome {
        Ok(dropped) => {
            info!(store_id = %store_id, app_id = %app_id, dropped, "tables cleared");
            emit(
                &socket,
                "clear_database_response",
                json!({"success": true, "clearedTables": dropped, "syncId": payload.sync_id}),
            );
        }
        Err(e) => {
            error!(store_id = %store_id, app_id = %app_id, error = %e, "clear tables failed");
            emit(
                &socket,
                "clear_database_response",
                json!({"success": false, "error": e.to_string(), "syncId": payload.sync_id}),
            );
        }
    }
}

// ============================================================================
// CSV bootstrap path
// ============================================================================

async fn on_csv_upload(socket: SocketRef, Data(value): Data<Value>, State(ctx): State<SessionContext>) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };
    let _order = state.serialise().await;

    let payload = match CsvUploadPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let bytes = match BASE64.decode(payload.file_content.as_bytes()) {
        Ok(b) => b,
        Err(e) => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({
                    "fileName": payload.file_name,
                    "success": false,
                    "error": format!("invalid base64 content: {e}"),
                }),
            );
            return;
        }
    };

    if let Some(declared) = payload.file_size_bytes {
        if declared != bytes.len() as u64 {
            warn!(
                file = %payload.file_name,
                declared,
                actual = bytes.len(),
                "upload size differs from declared size"
            );
        }
    }

    run_import(
        &socket,
        &ctx,
        &store_id,
        &app_id,
        &payload.table_name,
        &payload.file_name,
        bytes,
    )
    .await;
}

async fn on_csv_upload_start(
    socket: SocketRef,
    Data(value): Data<Value>,
    State(ctx): State<SessionContext>,
) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((_, app_id)) = require_identity(&socket, &state) else {
        return;
    };

    let payload = match CsvUploadStartPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let accumulator = match ChunkAccumulator::new(
        app_id.as_str(),
        &payload.table_name,
        &payload.file_name,
        payload.total_chunks,
        payload.file_size_bytes.unwrap_or(0),
        payload.row_count.unwrap_or(0),
    ) {
        Ok(acc) => acc,
        Err(e) => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({"fileName": payload.file_name, "success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    info!(
        socket_id = %socket.id,
        file = %payload.file_name,
        chunks = payload.total_chunks,
        "chunked upload started"
    );
    state.insert_upload(
        (app_id.as_str().to_string(), payload.file_name.clone()),
        accumulator,
    );

    emit(
        &socket,
        "csv_bulk_upload_response",
        json!({
            "fileName": payload.file_name,
            "success": true,
            "chunked": true,
            "expectedChunks": payload.total_chunks,
        }),
    );
}

async fn on_csv_upload_chunk(
    socket: SocketRef,
    Data(value): Data<Value>,
    State(ctx): State<SessionContext>,
) {
    let _guard = ctx.tracker.handler_start();
    let state = session(&socket);
    let Some((store_id, app_id)) = require_identity(&socket, &state) else {
        return;
    };

    let payload = match CsvUploadChunkPayload::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({"success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    let key: UploadKey = (app_id.as_str().to_string(), payload.file_name.clone());

    let bytes = match BASE64.decode(payload.chunk_content.as_bytes()) {
        Ok(b) => b,
        Err(e) => {
            state.take_upload(&key);
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({
                    "fileName": payload.file_name,
                    "success": false,
                    "error": format!("invalid base64 chunk: {e}"),
                }),
            );
            return;
        }
    };

    let stored = state.with_upload(&key, |acc| {
        acc.add_chunk(payload.chunk_index, bytes).map(|_| {
            (
                acc.is_complete(),
                acc.received_count(),
                acc.expected_chunks,
                acc.table_name.clone(),
            )
        })
    });

    let (complete, received, expected, table_name) = match stored {
        None => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({
                    "fileName": payload.file_name,
                    "success": false,
                    "error": "no upload in progress for this file",
                }),
            );
            return;
        }
        Some(Err(e)) => {
            state.take_upload(&key);
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({"fileName": payload.file_name, "success": false, "error": e.to_string()}),
            );
            return;
        }
        Some(Ok(progress)) => progress,
    };

    emit(
        &socket,
        "csv_bulk_import_progress",
        json!({
            "fileName": payload.file_name,
            "receivedChunks": received,
            "totalChunks": expected,
        }),
    );

    if !complete {
        return;
    }

    // Every chunk is in; reassemble and import.
    let Some(accumulator) = state.take_upload(&key) else {
        return;
    };
    let _order = state.serialise().await;

    let bytes = match accumulator.assemble() {
        Ok(b) => b,
        Err(e) => {
            emit(
                &socket,
                "csv_bulk_upload_response",
                json!({"fileName": payload.file_name, "success": false, "error": e.to_string()}),
            );
            return;
        }
    };

    run_import(
        &socket,
        &ctx,
        &store_id,
        &app_id,
        &table_name,
        &payload.file_name,
        bytes,
    )
    .await;
}

/// Persist upload bytes and run the bulk import, emitting the outcome.
async fn run_import(
    socket: &SocketRef,
    ctx: &SessionContext,
    store_id: &StoreId,
    app_id: &AppId,
    table_name: &str,
    file_name: &str,
    bytes: Vec<u8>,
) {
    let session_id = socket.id.to_string();

    let outcome = async {
        let database = ctx.tenants.require_database(store_id, app_id).await?;
        let path = ctx.uploads.persist(&session_id, file_name, &bytes).await?;
        drop(bytes);

        emit(
            socket,
            "csv_bulk_import_progress",
            json!({"fileName": file_name, "tableName": table_name, "stage": "importing"}),
        );

        match ctx.importer.import(&database, table_name, &path).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Import failed; the source file is no longer useful.
                ctx.uploads.remove(&path).await;
                Err(e)
            }
        }
    }
    .await;

    match outcome {
        Ok(result) => {
            ctx.metrics.inc_counter(metrics::CSV_IMPORTS).await;
            ctx.metrics
                .add_counter(metrics::CSV_ROWS_IMPORTED, result.affected_rows)
                .await;
            emit(
                socket,
                "csv_file_import_complete",
                json!({
                    "tableName": table_name,
                    "fileName": file_name,
                    "importedRows": result.affected_rows,
                    "skippedRows": result.skipped_rows,
                    "success": true,
                }),
            );
            emit(
                socket,
                "csv_bulk_upload_response",
                json!({
                    "fileName": file_name,
                    "success": true,
                    "importedRows": result.affected_rows,
                    "skippedRows": result.skipped_rows,
                }),
            );
        }
        Err(e) => {
            warn!(store_id = %store_id, table = table_name, error = %e, "csv import failed");
            emit(
                socket,
                "csv_bulk_upload_response",
                json!({"fileName": file_name, "success": false, "error": e.to_string()}),
            );
        }
    }
}
