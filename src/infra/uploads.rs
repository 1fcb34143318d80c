//! CSV upload persistence and chunk reassembly
//!
//! Single-shot uploads land straight on disk; chunked uploads accumulate
//! in memory per session until every declared chunk has arrived, then are
//! written out in ascending index order. Accumulators never span
//! reconnects, so there is no rebuild-from-disk path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use crate::infra::{BridgeError, Result};

/// Hard ceiling on a single upload; matches the transport's bulk cap.
pub const MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// In-memory accumulator for one chunked upload
#[derive(Debug)]
pub struct ChunkAccumulator {
    pub tenant_app_id: String,
    pub table_name: String,
    pub file_name: String,
    pub expected_chunks: u32,
    pub declared_bytes: u64,
    pub declared_rows: u64,
    pub started_at: DateTime<Utc>,
    received: HashMap<u32, Vec<u8>>,
    received_bytes: u64,
}

impl ChunkAccumulator {
    pub fn new(
        tenant_app_id: impl Into<String>,
        table_name: impl Into<String>,
        file_name: impl Into<String>,
        expected_chunks: u32,
        declared_bytes: u64,
        declared_rows: u64,
    ) -> Result<Self> {
        if expected_chunks == 0 {
            return Err(BridgeError::Upload("totalChunks must be positive".into()));
        }
        if declared_bytes > MAX_UPLOAD_BYTES {
            return Err(BridgeError::Upload(format!(
                "declared size {declared_bytes} exceeds the {MAX_UPLOAD_BYTES}-byte cap"
            )));
        }
        Ok(Self {
            tenant_app_id: tenant_app_id.into(),
            table_name: table_name.into(),
            file_name: file_name.into(),
            expected_chunks,
            declared_bytes,
            declared_rows,
            started_at: Utc::now(),
            received: HashMap::new(),
            received_bytes: 0,
        })
    }

    /// Store one decoded chunk. Indices are `[0, expected)`; a re-sent
    /// index overwrites its previous bytes.
    pub fn add_chunk(&mut self, index: u32, bytes: Vec<u8>) -> Result<()> {
        if index >= self.expected_chunks {
            return Err(BridgeError::Upload(format!(
                "chunk index {index} out of range (expected {} chunks)",
                self.expected_chunks
            )));
        }

        if let Some(previous) = self.received.insert(index, bytes) {
            self.received_bytes -= previous.len() as u64;
            debug!(file = %self.file_name, index, "chunk re-sent, overwriting");
        }
        self.received_bytes += self.received[&index].len() as u64;

        if self.received_bytes > MAX_UPLOAD_BYTES {
            return Err(BridgeError::Upload(format!(
                "upload of {} exceeds the {MAX_UPLOAD_BYTES}-byte cap",
                self.file_name
            )));
        }
        Ok(())
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.expected_chunks
    }

    /// Concatenate all chunks in ascending index order.
    pub fn assemble(mut self) -> Result<Vec<u8>> {
        let mut missing = Vec::new();
        for index in 0..self.expected_chunks {
            if !self.received.contains_key(&index) {
                missing.push(index.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(BridgeError::Upload(format!(
                "upload of {} is missing chunks [{}]",
                self.file_name,
                missing.join(", ")
            )));
        }

        let mut out = Vec::with_capacity(self.received_bytes as usize);
        for index in 0..self.expected_chunks {
            out.extend_from_slice(&self.received.remove(&index).unwrap());
        }

        if out.len() as u64 != self.declared_bytes {
            warn!(
                file = %self.file_name,
                declared = self.declared_bytes,
                actual = out.len(),
                "reassembled size differs from declared size"
            );
        }
        Ok(out)
    }
}

/// Per-server uploads directory
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write upload bytes under a per-session directory; returns the path.
    ///
    /// File names are reduced to their final component so a hostile client
    /// cannot steer writes outside the uploads tree.
    pub async fn persist(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let safe_name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| BridgeError::Upload(format!("invalid file name {file_name:?}")))?;

        let dir = self.root.join(sanitise_component(session_id));
        fs::create_dir_all(&dir).await?;

        let path = dir.join(safe_name);
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "upload persisted");
        Ok(path)
    }

    /// Delete an uploaded file, ignoring already-gone files.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to delete upload");
            }
        }
    }
}

fn sanitise_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
