//! Per-connection session state
//!
//! Created at accept, destroyed at disconnect. All tenancy state lives
//! here; nothing about a session is global. The dispatcher-facing events
//! are rejected until `identify` binds a store and app id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::{AppId, StoreId};
use crate::infra::uploads::ChunkAccumulator;

/// Key for pending chunk uploads: `(app_id, file_name)`
pub type UploadKey = (String, String);

#[derive(Default)]
struct SessionInner {
    store_id: Option<StoreId>,
    app_id: Option<AppId>,
    service_type: Option<String>,
    license_days_remaining: Option<i64>,
    full_sync_active: bool,
    pending_uploads: HashMap<UploadKey, ChunkAccumulator>,
}

/// Cloneable handle to one session's state
#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<SessionInner>>,
    /// Serialises event processing for this session, preserving arrival
    /// order across await points.
    order: Arc<tokio::sync::Mutex<()>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold this across a handler's database work to keep per-session
    /// operations in arrival order.
    pub async fn serialise(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.order.lock().await
    }

    /// Bind tenant identity after a successful `identify`.
    pub fn bind_identity(
        &self,
        store_id: StoreId,
        app_id: AppId,
        service_type: Option<String>,
        license_days_remaining: Option<i64>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.store_id = Some(store_id);
        inner.app_id = Some(app_id);
        inner.service_type = service_type;
        inner.license_days_remaining = license_days_remaining;
    }

    /// The bound `(store_id, app_id)`, or `None` before identification.
    pub fn identity(&self) -> Option<(StoreId, AppId)> {
        let inner = self.inner.lock().unwrap();
        match (&inner.store_id, &inner.app_id) {
            (Some(store_id), Some(app_id)) => Some((store_id.clone(), app_id.clone())),
            _ => None,
        }
    }

    pub fn is_identified(&self) -> bool {
        self.identity().is_some()
    }

    pub fn service_type(&self) -> Option<String> {
        self.inner.lock().unwrap().service_type.clone()
    }

    pub fn set_full_sync_active(&self, active: bool) {
        self.inner.lock().unwrap().full_sync_active = active;
    }

    pub fn full_sync_active(&self) -> bool {
        self.inner.lock().unwrap().full_sync_active
    }

    /// Register a chunked upload; replaces any in-flight upload with the
    /// same key.
    pub fn insert_upload(&self, key: UploadKey, accumulator: ChunkAccumulator) {
        self.inner
            .lock()
            .unwrap()
            .pending_uploads
            .insert(key, accumulator);
    }

    /// Mutate a pending upload in place; `None` when the key is unknown.
    pub fn with_upload<R>(
        &self,
        key: &UploadKey,
        f: impl FnOnce(&mut ChunkAccumulator) -> R,
    ) -> Option<R> {
        self.inner
            .lock()
            .unwrap()
            .pending_uploads
            .get_mut(key)
            .map(f)
    }

    /// Remove and return a pending upload.
    pub fn take_upload(&self, key: &UploadKey) -> Option<ChunkAccumulator> {
        self.inner.lock().unwrap().pending_uploads.remove(key)
    }

    pub fn pending_upload_count(&self) -> usize {
        self.inner.lock().unwrap().pending_uploads.len()
    }

    /// Drop all per-session bookkeeping; called on disconnect.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_uploads.clear();
        inner.full_sync_active = false;
    }
}
