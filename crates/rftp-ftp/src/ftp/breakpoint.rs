//! Breakpoint bookkeeping: persisted resume offsets keyed by transfer
//! identity.
//!
//! `JsonBreakpointStore` keeps every record in one JSON document:
//!
//! ```json
//! { "records": [
//!   { "TransferMode": 0, "Host": "ftp.example.org", "ServerPath": "/pub",
//!     "LocalPath": "/home/me/dl", "Filename": "big.iso", "Offset": 4096,
//!     "UpdatedAt": "2026-01-01T12:00:00Z" }
//! ] }
//! ```

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{TransferDescriptor, TransferDirection, TransferKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use uuid::Uuid;

lazy_static! {
    /// One lock per breakpoint file, shared by every store in the process.
    static ref FILE_LOCKS: StdMutex<HashMap<PathBuf, Arc<StdMutex<()>>>> =
        StdMutex::new(HashMap::new());
}

/// Repository of resume offsets.
#[async_trait]
pub trait BreakpointStore: Send + Sync {
    /// Stored offset for the descriptor's identity, 0 if none.
    async fn get(&self, descriptor: &TransferDescriptor) -> FtpResult<u64>;

    /// Create or update the record with `descriptor.offset`.
    async fn put(&self, descriptor: &TransferDescriptor) -> FtpResult<()>;

    /// Remove the record, if any.
    async fn delete(&self, descriptor: &TransferDescriptor) -> FtpResult<()>;
}

/// One persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BreakpointRecord {
    pub transfer_mode: i32,
    pub host: String,
    pub server_path: String,
    pub local_path: String,
    pub filename: String,
    pub offset: u64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl BreakpointRecord {
    pub fn from_descriptor(d: &TransferDescriptor) -> Self {
        Self {
            transfer_mode: d.direction.as_mode(),
            host: d.host.clone(),
            server_path: d.server_path.clone(),
            local_path: d.local_path.clone(),
            filename: d.filename.clone(),
            offset: d.offset,
            updated_at: Utc::now(),
        }
    }

    pub fn matches(&self, d: &TransferDescriptor) -> bool {
        TransferDirection::from_mode(self.transfer_mode) == Some(d.direction)
            && self.host == d.host
            && self.server_path == d.server_path
            && self.local_path == d.local_path
            && self.filename == d.filename
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BreakpointDocument {
    #[serde(default)]
    records: Vec<BreakpointRecord>,
}

// ─── JSON file store ─────────────────────────────────────────────────

/// File-backed store. Each operation loads, edits and rewrites the whole
/// document on the blocking pool while holding a process-wide lock keyed
/// by the file's absolute path, so any number of stores (and sessions)
/// opened on the same file see each other's updates. The lock is never
/// held across an `.await`.
#[derive(Clone)]
pub struct JsonBreakpointStore {
    path: PathBuf,
    lock: Arc<StdMutex<()>>,
}

impl JsonBreakpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = lock_for(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records currently on disk.
    pub async fn records(&self) -> FtpResult<Vec<BreakpointRecord>> {
        self.with_document(|_| false).await.map(|doc| doc.records)
    }

    /// Run `edit` against the current document under the file lock and
    /// rewrite the file if it returns `true`. Returns the resulting document.
    async fn with_document<F>(&self, edit: F) -> FtpResult<BreakpointDocument>
    where
        F: FnOnce(&mut BreakpointDocument) -> bool + Send + 'static,
    {
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || -> FtpResult<BreakpointDocument> {
            let _guard = lock
                .lock()
                .map_err(|_| FtpError::store("breakpoint file lock poisoned"))?;
            let mut doc = load(&path)?;
            if edit(&mut doc) {
                save(&path, &doc)?;
            }
            Ok(doc)
        })
        .await
        .map_err(|e| FtpError::store(format!("breakpoint task failed: {}", e)))?
    }
}

/// Lock shared by every store opened on `path`.
fn lock_for(path: &Path) -> Arc<StdMutex<()>> {
    let key = lock_key(path);
    match FILE_LOCKS.lock() {
        Ok(mut locks) => Arc::clone(locks.entry(key).or_default()),
        // a poisoned registry still hands out a private lock
        Err(_) => Arc::new(StdMutex::new(())),
    }
}

/// Absolute path with its deepest existing ancestor canonicalised, so the
/// key does not change when the file or its directories get created.
fn lock_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

fn load(path: &Path) -> FtpResult<BreakpointDocument> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BreakpointDocument::default()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            FtpError::store(format!("Corrupt breakpoint file {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BreakpointDocument::default()),
        Err(e) => Err(FtpError::store(format!(
            "Cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn save(path: &Path, doc: &BreakpointDocument) -> FtpResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                FtpError::store(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
    }
    let json = serde_json::to_vec_pretty(doc)?;

    // unique per write so other processes on the same file never collide
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, json)
        .map_err(|e| FtpError::store(format!("Cannot write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        FtpError::store(format!("Cannot replace {}: {}", path.display(), e))
    })
}

#[async_trait]
impl BreakpointStore for JsonBreakpointStore {
    async fn get(&self, descriptor: &TransferDescriptor) -> FtpResult<u64> {
        let doc = self.with_document(|_| false).await?;
        Ok(doc
            .records
            .iter()
            .find(|r| r.matches(descriptor))
            .map(|r| r.offset)
            .unwrap_or(0))
    }

    async fn put(&self, descriptor: &TransferDescriptor) -> FtpResult<()> {
        let d = descriptor.clone();
        self.with_document(move |doc| {
            match doc.records.iter_mut().find(|r| r.matches(&d)) {
                Some(record) => {
                    record.offset = d.offset;
                    record.updated_at = Utc::now();
                }
                None => doc.records.push(BreakpointRecord::from_descriptor(&d)),
            }
            true
        })
        .await?;
        log::debug!(
            "breakpoint for {} saved at {}",
            descriptor.filename,
            descriptor.offset
        );
        Ok(())
    }

    async fn delete(&self, descriptor: &TransferDescriptor) -> FtpResult<()> {
        let d = descriptor.clone();
        self.with_document(move |doc| {
            let before = doc.records.len();
            doc.records.retain(|r| !r.matches(&d));
            doc.records.len() != before
        })
        .await?;
        log::debug!("breakpoint for {} cleared", descriptor.filename);
        Ok(())
    }
}

// ─── In-memory store ─────────────────────────────────────────────────

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBreakpointStore {
    offsets: StdMutex<HashMap<TransferKey, u64>>,
}

impl MemoryBreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.offsets.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BreakpointStore for MemoryBreakpointStore {
    async fn get(&self, descriptor: &TransferDescriptor) -> FtpResult<u64> {
        let map = self
            .offsets
            .lock()
            .map_err(|_| FtpError::store("breakpoint map poisoned"))?;
        Ok(map.get(&descriptor.key()).copied().unwrap_or(0))
    }

    async fn put(&self, descriptor: &TransferDescriptor) -> FtpResult<()> {
        let mut map = self
            .offsets
            .lock()
            .map_err(|_| FtpError::store("breakpoint map poisoned"))?;
        map.insert(descriptor.key(), descriptor.offset);
        Ok(())
    }

    async fn delete(&self, descriptor: &TransferDescriptor) -> FtpResult<()> {
        let mut map = self
            .offsets
            .lock()
            .map_err(|_| FtpError::store("breakpoint map poisoned"))?;
        map.remove(&descriptor.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor(name: &str, offset: u64) -> TransferDescriptor {
        TransferDescriptor::download("ftp.example.org", "/pub", "/home/me", name)
            .with_offset(offset)
    }

    async fn exercise(store: &dyn BreakpointStore) {
        let d = descriptor("a.bin", 0);
        assert_eq!(store.get(&d).await.unwrap(), 0);

        store.put(&d.clone().with_offset(4096)).await.unwrap();
        assert_eq!(store.get(&d).await.unwrap(), 4096);

        store.put(&d.clone().with_offset(8192)).await.unwrap();
        assert_eq!(store.get(&d).await.unwrap(), 8192);

        let other = descriptor("b.bin", 7);
        store.put(&other).await.unwrap();
        assert_eq!(store.get(&other).await.unwrap(), 7);

        store.delete(&d).await.unwrap();
        assert_eq!(store.get(&d).await.unwrap(), 0);
        assert_eq!(store.get(&other).await.unwrap(), 7);

        // deleting twice is harmless
        store.delete(&d).await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_contract() {
        let store = MemoryBreakpointStore::new();
        exercise(&store).await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn json_store_contract() {
        let dir = tempdir().unwrap();
        let store = JsonBreakpointStore::new(dir.path().join("bp.json"));
        exercise(&store).await;
        assert_eq!(store.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("bp.json");
        let d = descriptor("c.iso", 123_456);

        JsonBreakpointStore::new(&path).put(&d).await.unwrap();
        let reopened = JsonBreakpointStore::new(&path);
        assert_eq!(reopened.get(&d).await.unwrap(), 123_456);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"TransferMode\": 0"));
        assert!(raw.contains("\"Filename\": \"c.iso\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_stores_on_one_file_keep_every_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let mut tasks = Vec::new();
        for i in 0..8u64 {
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                let store = JsonBreakpointStore::new(&path);
                store.put(&descriptor(&format!("part{}.bin", i), i + 1)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let store = JsonBreakpointStore::new(&path);
        assert_eq!(store.records().await.unwrap().len(), 8);
        for i in 0..8u64 {
            let d = descriptor(&format!("part{}.bin", i), 0);
            assert_eq!(store.get(&d).await.unwrap(), i + 1);
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn lock_key_is_stable_across_file_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("later").join("bp.json");
        let before = lock_key(&path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(before, lock_key(&path));
    }

    #[tokio::test]
    async fn direction_is_part_of_identity() {
        let store = MemoryBreakpointStore::new();
        let down = descriptor("x", 10);
        let mut up = down.clone();
        up.direction = TransferDirection::Upload;
        store.put(&down).await.unwrap();
        assert_eq!(store.get(&up).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bp.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonBreakpointStore::new(&path)
            .get(&descriptor("x", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::Store);
    }
}
