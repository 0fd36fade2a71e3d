use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use stash_types::{AssetName, AssetRecord};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::log::{self, LogEntry, RecordLog, SyncMode};
use crate::schema::Schema;
use crate::traits::{AssetStore, StoreStats};

/// File name of the record log inside a store directory.
pub const LOG_FILE: &str = "records.log";

/// Where a live record sits in the log.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    payload_bytes: u64,
}

/// Result of [`FileAssetStore::compact`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactReport {
    pub records: usize,
    pub before_bytes: u64,
    pub after_bytes: u64,
}

struct FileState {
    /// `None` once the store is closed.
    log: Option<RecordLog>,
    index: BTreeMap<AssetName, Slot>,
}

struct FileInner {
    dir: PathBuf,
    log_path: PathBuf,
    schema: Schema,
    sync_mode: SyncMode,
    state: Mutex<FileState>,
}

/// Durable record store backed by an append-only log.
///
/// Opening the store replays the log into an in-memory index of name to
/// offset; payloads stay on disk until read. Every `put` and `delete` is a
/// single framed log entry, and the index is updated only after the entry
/// is flushed, so a reader sees either the whole record or nothing.
///
/// Every operation, index lookups included, runs on `spawn_blocking`: the
/// state lock can be held across a payload read, and waiting on it must
/// not stall the async runtime.
#[derive(Clone)]
pub struct FileAssetStore {
    inner: Arc<FileInner>,
}

impl FileAssetStore {
    /// Open (or create) a store in `dir`.
    ///
    /// A torn entry at the tail of the log, left by a crash mid-write, is
    /// cut off so later appends stay reachable.
    pub fn open(dir: &Path, schema: Schema, sync_mode: SyncMode) -> StoreResult<Self> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Unavailable {
            path: dir.to_path_buf(),
            source,
        })?;
        let log_path = dir.join(LOG_FILE);

        let mut index = BTreeMap::new();
        let valid_end = log::scan(&log_path, |offset, entry| match entry {
            LogEntry::Put { record, .. } => {
                let slot = Slot {
                    offset,
                    payload_bytes: record.total_bytes(),
                };
                index.insert(record.name, slot);
            }
            LogEntry::Delete { name } => {
                index.remove(&name);
            }
        })?;

        let file_len = match fs::metadata(&log_path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(StoreError::Unavailable {
                    path: log_path,
                    source,
                })
            }
        };
        if valid_end < file_len {
            warn!(
                path = %log_path.display(),
                valid_end,
                file_len,
                "discarding torn tail of record log"
            );
            fs::OpenOptions::new()
                .write(true)
                .open(&log_path)?
                .set_len(valid_end)?;
        }

        let log = RecordLog::open(&log_path, sync_mode).map_err(|source| {
            StoreError::Unavailable {
                path: log_path.clone(),
                source,
            }
        })?;

        info!(dir = %dir.display(), records = index.len(), "file store opened");
        Ok(Self {
            inner: Arc::new(FileInner {
                dir: dir.to_path_buf(),
                log_path,
                schema,
                sync_mode,
                state: Mutex::new(FileState {
                    log: Some(log),
                    index,
                }),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Rewrite the log with only live records, reclaiming space held by
    /// deleted entries.
    pub async fn compact(&self) -> StoreResult<CompactReport> {
        self.blocking(|inner| inner.compact()).await
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&FileInner) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| StoreError::Io(io::Error::other(e)))?
    }
}

impl FileInner {
    fn lock(&self) -> StoreResult<MutexGuard<'_, FileState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn get(&self, name: &AssetName) -> StoreResult<Option<AssetRecord>> {
        let state = self.lock()?;
        if state.log.is_none() {
            return Err(StoreError::Closed);
        }
        let Some(slot) = state.index.get(name).copied() else {
            return Ok(None);
        };
        // Held across the read: compaction moves entries.
        match log::read_at(&self.log_path, slot.offset)? {
            LogEntry::Put { record, .. } if record.name == *name => Ok(Some(record)),
            _ => Err(StoreError::Corrupt {
                offset: slot.offset,
                reason: format!("index entry for {name} does not point at its record"),
            }),
        }
    }

    fn put(&self, record: AssetRecord) -> StoreResult<()> {
        self.schema.validate(&record)?;
        let mut state = self.lock()?;
        if state.index.contains_key(&record.name) {
            return Err(StoreError::DuplicateKey(record.name));
        }
        let log = state.log.as_mut().ok_or(StoreError::Closed)?;

        let name = record.name.clone();
        let payload_bytes = record.total_bytes();
        let offset = log.append(&LogEntry::put(record))?;
        state.index.insert(
            name.clone(),
            Slot {
                offset,
                payload_bytes,
            },
        );
        debug!(%name, offset, payload_bytes, "record committed");
        Ok(())
    }

    fn delete(&self, name: &AssetName) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let FileState { log, index } = &mut *state;
        let log = log.as_mut().ok_or(StoreError::Closed)?;
        if !index.contains_key(name) {
            return Ok(false);
        }
        log.append(&LogEntry::Delete { name: name.clone() })?;
        index.remove(name);
        debug!(%name, "record deleted");
        Ok(true)
    }

    fn keys(&self) -> StoreResult<Vec<AssetName>> {
        let state = self.lock()?;
        if state.log.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(state.index.keys().cloned().collect())
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.lock()?;
        let log = state.log.as_ref().ok_or(StoreError::Closed)?;
        Ok(StoreStats {
            records: state.index.len(),
            total_bytes: state.index.values().map(|s| s.payload_bytes).sum(),
            log_bytes: Some(log.offset()),
        })
    }

    fn compact(&self) -> StoreResult<CompactReport> {
        let mut state = self.lock()?;
        let before_bytes = state.log.as_ref().ok_or(StoreError::Closed)?.offset();

        let tmp_path = self.dir.join(format!("{LOG_FILE}.compact"));
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let mut fresh = RecordLog::open(&tmp_path, self.sync_mode)?;
        let mut index = BTreeMap::new();
        for (name, slot) in &state.index {
            let entry = log::read_at(&self.log_path, slot.offset)?;
            let offset = fresh.append(&entry)?;
            index.insert(
                name.clone(),
                Slot {
                    offset,
                    payload_bytes: slot.payload_bytes,
                },
            );
        }
        fresh.sync()?;
        let after_bytes = fresh.offset();

        // Until the rename lands the old log stays authoritative. After it,
        // the compacted writer is already open on the live file, so there
        // is no reopen that could fail and leave the old descriptor behind.
        fs::rename(&tmp_path, &self.log_path)?;
        fresh.renamed_to(&self.log_path);
        state.log = Some(fresh);
        state.index = index;

        info!(
            records = state.index.len(),
            before_bytes,
            after_bytes,
            "record log compacted"
        );
        Ok(CompactReport {
            records: state.index.len(),
            before_bytes,
            after_bytes,
        })
    }

    fn contains(&self, name: &AssetName) -> StoreResult<bool> {
        let state = self.lock()?;
        if state.log.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(state.index.contains_key(name))
    }

    fn close(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        if let Some(mut log) = state.log.take() {
            log.sync()?;
            debug!(dir = %self.dir.display(), "file store closed");
        }
        Ok(())
    }
}

#[async_trait]
impl AssetStore for FileAssetStore {
    async fn get(&self, name: &AssetName) -> StoreResult<Option<AssetRecord>> {
        let name = name.clone();
        self.blocking(move |inner| inner.get(&name)).await
    }

    async fn put(&self, record: &AssetRecord) -> StoreResult<()> {
        let record = record.clone();
        self.blocking(move |inner| inner.put(record)).await
    }

    async fn delete(&self, name: &AssetName) -> StoreResult<bool> {
        let name = name.clone();
        self.blocking(move |inner| inner.delete(&name)).await
    }

    async fn keys(&self) -> StoreResult<Vec<AssetName>> {
        self.blocking(|inner| inner.keys()).await
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.blocking(|inner| inner.stats()).await
    }

    fn schema(&self) -> Schema {
        self.inner.schema.clone()
    }

    async fn contains(&self, name: &AssetName) -> StoreResult<bool> {
        let name = name.clone();
        self.blocking(move |inner| inner.contains(&name)).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.blocking(|inner| inner.close()).await
    }
}

impl std::fmt::Debug for FileAssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAssetStore")
            .field("dir", &self.inner.dir)
            .finish()
    }
}
