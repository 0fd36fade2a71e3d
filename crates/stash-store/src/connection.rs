//! Store lifecycle: versioned open with schema upgrade, handle caching and
//! close.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stash_types::{AssetName, AssetRecord};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::file::{CompactReport, FileAssetStore};
use crate::log::SyncMode;
use crate::memory::InMemoryAssetStore;
use crate::schema::{Manifest, Schema, SchemaBuilder};
use crate::traits::{AssetStore, StoreStats};

/// Where stores live and how hard they sync.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per store. `None` keeps every
    /// store in memory.
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl StoreConfig {
    pub fn on_disk(root: impl Into<PathBuf>, sync_mode: SyncMode) -> Self {
        Self {
            root: Some(root.into()),
            sync_mode,
        }
    }
}

/// Volatile store kept by the manager so data outlives its handles.
struct MemorySlot {
    version: u32,
    store: Arc<InMemoryAssetStore>,
}

#[derive(Default)]
struct ManagerState {
    open: HashMap<String, StoreHandle>,
    memory: HashMap<String, MemorySlot>,
}

/// Opens named stores at a schema version, running upgrades as needed.
///
/// Opens are serialized by one async lock per manager, so an upgrade in
/// progress is observed by every later open as already applied.
pub struct ConnectionManager {
    config: StoreConfig,
    state: Mutex<ManagerState>,
}

impl ConnectionManager {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// A manager whose stores never touch the filesystem.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open `name` at `version`.
    ///
    /// When the store is missing or older than `version`, `upgrade` is called
    /// with the stored schema and the old version (`0` for a new store). The
    /// new schema and version are persisted before the handle is returned;
    /// if `upgrade` fails nothing is persisted and the error is returned.
    pub async fn open<F>(&self, name: &str, version: u32, upgrade: F) -> StoreResult<StoreHandle>
    where
        F: FnOnce(&mut SchemaBuilder, u32) -> StoreResult<()>,
    {
        if version == 0 {
            return Err(StoreError::InvalidVersion);
        }
        validate_store_name(name)?;
        let mut state = self.state.lock().await;

        if let Some(live) = state.open.get(name).cloned() {
            if live.is_closed() {
                state.open.remove(name);
            } else if live.version() == version {
                debug!(store = name, version, "reusing open handle");
                return Ok(live);
            } else if live.version() > version {
                return Err(StoreError::VersionTooNew {
                    on_disk: live.version(),
                    requested: version,
                });
            } else {
                debug!(store = name, old = live.version(), new = version, "replacing handle");
                live.shutdown().await?;
                state.open.remove(name);
            }
        }

        let handle = match &self.config.root {
            Some(root) => self.open_file(root, name, version, upgrade).await?,
            None => Self::open_memory(&mut state, name, version, upgrade)?,
        };
        state.open.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Manifest and log I/O run on blocking threads; only the upgrade
    /// callback, which touches nothing but the schema, runs inline.
    async fn open_file<F>(
        &self,
        root: &Path,
        name: &str,
        version: u32,
        upgrade: F,
    ) -> StoreResult<StoreHandle>
    where
        F: FnOnce(&mut SchemaBuilder, u32) -> StoreResult<()>,
    {
        let dir = root.join(name);
        let (dir, manifest) = blocking(move || {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Unavailable {
                path: dir.clone(),
                source,
            })?;
            let manifest = Manifest::load(&dir)?;
            Ok((dir, manifest))
        })
        .await?;

        let (on_disk, schema) = match manifest {
            Some(m) => (m.version, m.schema),
            None => (0, Schema::default()),
        };
        let schema = upgrade_schema(name, on_disk, version, schema, upgrade)?;

        let store_name = name.to_string();
        let sync_mode = self.config.sync_mode;
        let store = blocking(move || {
            if on_disk < version {
                Manifest {
                    store: store_name,
                    version,
                    schema: schema.clone(),
                }
                .store(&dir)?;
            }
            FileAssetStore::open(&dir, schema, sync_mode)
        })
        .await?;
        Ok(StoreHandle::new(name, version, Backend::File(store)))
    }

    fn open_memory<F>(
        state: &mut ManagerState,
        name: &str,
        version: u32,
        upgrade: F,
    ) -> StoreResult<StoreHandle>
    where
        F: FnOnce(&mut SchemaBuilder, u32) -> StoreResult<()>,
    {
        let (on_disk, schema) = match state.memory.get(name) {
            Some(slot) => (slot.version, slot.store.schema()),
            None => (0, Schema::default()),
        };
        let schema = upgrade_schema(name, on_disk, version, schema, upgrade)?;

        let slot = state
            .memory
            .entry(name.to_string())
            .or_insert_with(|| MemorySlot {
                version: 0,
                store: Arc::new(InMemoryAssetStore::default()),
            });
        slot.store.set_schema(schema)?;
        slot.version = version;

        let store: Arc<dyn AssetStore> = slot.store.clone();
        Ok(StoreHandle::new(name, version, Backend::Shared(store)))
    }

    /// Close a handle. Later operations through any clone of it fail with
    /// [`StoreError::Closed`]. Closing twice is a no-op.
    pub async fn close(&self, handle: &StoreHandle) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let is_cached = state
            .open
            .get(handle.name())
            .is_some_and(|live| Arc::ptr_eq(&live.inner, &handle.inner));
        if is_cached {
            state.open.remove(handle.name());
        }
        handle.shutdown().await
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("root", &self.config.root)
            .field("sync_mode", &self.config.sync_mode)
            .finish()
    }
}

/// Store names become directory names under the root, so they follow the
/// same rules as asset names: non-empty, no separators, not `.` or `..`.
pub fn validate_store_name(name: &str) -> StoreResult<()> {
    AssetName::new(name)
        .map(|_| ())
        .map_err(|e| StoreError::InvalidStoreName {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

fn upgrade_schema<F>(
    name: &str,
    on_disk: u32,
    requested: u32,
    schema: Schema,
    upgrade: F,
) -> StoreResult<Schema>
where
    F: FnOnce(&mut SchemaBuilder, u32) -> StoreResult<()>,
{
    if on_disk > requested {
        return Err(StoreError::VersionTooNew { on_disk, requested });
    }
    if on_disk == requested {
        return Ok(schema);
    }
    let mut builder = SchemaBuilder::from_schema(schema);
    upgrade(&mut builder, on_disk)?;
    let schema = builder.finish();
    info!(
        store = name,
        from = on_disk,
        to = requested,
        indexes = schema.indexes.len(),
        "schema upgraded"
    );
    Ok(schema)
}

enum Backend {
    File(FileAssetStore),
    Shared(Arc<dyn AssetStore>),
}

impl Backend {
    fn store(&self) -> &dyn AssetStore {
        match self {
            Backend::File(s) => s as &dyn AssetStore,
            Backend::Shared(s) => s.as_ref(),
        }
    }
}

struct HandleInner {
    name: String,
    version: u32,
    backend: Backend,
    closed: AtomicBool,
}

/// An open store at a fixed schema version. Cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<HandleInner>,
}

impl StoreHandle {
    fn new(name: &str, version: u32, backend: Backend) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: name.to_string(),
                version,
                backend,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn schema(&self) -> Schema {
        self.inner.backend.store().schema()
    }

    fn store(&self) -> StoreResult<&dyn AssetStore> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(self.inner.backend.store())
    }

    pub async fn get(&self, name: &AssetName) -> StoreResult<Option<AssetRecord>> {
        self.store()?.get(name).await
    }

    /// Create-or-fail insert. See [`AssetStore::put`].
    pub async fn put(&self, record: &AssetRecord) -> StoreResult<()> {
        self.store()?.put(record).await
    }

    pub async fn delete(&self, name: &AssetName) -> StoreResult<bool> {
        self.store()?.delete(name).await
    }

    pub async fn contains(&self, name: &AssetName) -> StoreResult<bool> {
        self.store()?.contains(name).await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.store()?.stats().await?.records)
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn stats(&self) -> StoreResult<StoreStats> {
        self.store()?.stats().await
    }

    /// Iterate every record in ascending name order.
    ///
    /// The name list is snapshotted now; each record is read when the
    /// cursor reaches it. Calling again starts over.
    pub async fn list_all(&self) -> StoreResult<RecordCursor> {
        let keys = self.store()?.keys().await?;
        Ok(RecordCursor {
            keys: keys.into(),
            handle: self.clone(),
        })
    }

    /// Compact the record log. `None` for volatile stores.
    pub async fn compact(&self) -> StoreResult<Option<CompactReport>> {
        self.store()?;
        match &self.inner.backend {
            Backend::File(store) => store.compact().await.map(Some),
            Backend::Shared(_) => Ok(None),
        }
    }

    async fn shutdown(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(store = %self.inner.name, version = self.inner.version, "closing handle");
        self.inner.backend.store().close().await
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lazy, ordered walk over a snapshot of store keys.
pub struct RecordCursor {
    keys: VecDeque<AssetName>,
    handle: StoreHandle,
}

impl RecordCursor {
    /// Next record, skipping names deleted since the snapshot.
    pub async fn next(&mut self) -> StoreResult<Option<AssetRecord>> {
        while let Some(name) = self.keys.pop_front() {
            if let Some(record) = self.handle.get(&name).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Names not yet visited.
    pub fn remaining(&self) -> usize {
        self.keys.len()
    }

    pub async fn collect_all(mut self) -> StoreResult<Vec<AssetRecord>> {
        let mut out = Vec::with_capacity(self.keys.len());
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MANIFEST_FILE;
    use bytes::Bytes;
    use stash_types::VariantTag;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn video_upgrade(b: &mut SchemaBuilder, _old: u32) -> StoreResult<()> {
        b.create_container("name")?
            .create_index("mp4", VariantTag::mp4())?
            .create_index("webm", VariantTag::webm())?;
        Ok(())
    }

    fn video(name: &str) -> AssetRecord {
        let mut variants = BTreeMap::new();
        variants.insert(VariantTag::mp4(), Bytes::from_static(b"mp4-bytes"));
        variants.insert(VariantTag::webm(), Bytes::from_static(b"webm-bytes"));
        AssetRecord::new(name.parse().unwrap(), variants)
    }

    fn name(s: &str) -> AssetName {
        s.parse().unwrap()
    }

    // ---- open / upgrade ------------------------------------------------

    #[tokio::test]
    async fn upgrade_runs_once_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let runs = AtomicUsize::new(0);
        let counted = |b: &mut SchemaBuilder, old: u32| {
            runs.fetch_add(1, Ordering::SeqCst);
            assert_eq!(old, 0);
            video_upgrade(b, old)
        };

        {
            let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::EveryWrite));
            let h = mgr.open("videos_db", 1, counted).await.unwrap();
            assert_eq!(h.schema().indexes.len(), 2);
            mgr.close(&h).await.unwrap();
        }

        let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::EveryWrite));
        let h = mgr
            .open("videos_db", 1, |_: &mut SchemaBuilder, _| -> StoreResult<()> {
                panic!("upgrade must not run again")
            })
            .await
            .unwrap();
        assert_eq!(h.version(), 1);
        assert!(h.schema().has_container());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn version_bump_sees_old_version_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::OsDefault));
        let v1 = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        v1.put(&video("pig")).await.unwrap();

        let v2 = mgr
            .open("videos_db", 2, |b: &mut SchemaBuilder, old| {
                assert_eq!(old, 1);
                b.delete_index("webm")?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(v1.is_closed());
        assert!(matches!(v1.get(&name("pig")).await, Err(StoreError::Closed)));
        assert!(v2.get(&name("pig")).await.unwrap().is_some());
        assert_eq!(v2.schema().indexes.len(), 1);
    }

    #[tokio::test]
    async fn older_version_is_rejected() {
        let mgr = ConnectionManager::in_memory();
        mgr.open("videos_db", 3, video_upgrade).await.unwrap();
        let err = mgr.open("videos_db", 2, video_upgrade).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionTooNew {
                on_disk: 3,
                requested: 2
            }
        ));
    }

    #[tokio::test]
    async fn version_zero_is_invalid() {
        let mgr = ConnectionManager::in_memory();
        assert!(matches!(
            mgr.open("videos_db", 0, video_upgrade).await,
            Err(StoreError::InvalidVersion)
        ));
    }

    #[tokio::test]
    async fn failed_upgrade_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::OsDefault));
        let err = mgr
            .open("videos_db", 1, |b: &mut SchemaBuilder, _| {
                b.create_container("id")?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaConflict(_)));
        assert!(Manifest::load(&dir.path().join("videos_db")).unwrap().is_none());

        mgr.open("videos_db", 1, video_upgrade).await.unwrap();
    }

    #[tokio::test]
    async fn interrupted_manifest_write_reruns_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("videos_db");
        {
            let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::OsDefault));
            let h = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
            mgr.close(&h).await.unwrap();
        }
        // Crash after writing the v2 temp manifest but before the rename.
        std::fs::write(store_dir.join("MANIFEST.json.tmp"), b"{\"store\":").unwrap();

        let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::OsDefault));
        let runs = AtomicUsize::new(0);
        let h = mgr
            .open("videos_db", 2, |b: &mut SchemaBuilder, old| {
                runs.fetch_add(1, Ordering::SeqCst);
                assert_eq!(old, 1);
                b.delete_index("webm")?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.version(), 2);
        assert_eq!(Manifest::load(&store_dir).unwrap().unwrap().version, 2);
        assert!(!store_dir.join("MANIFEST.json.tmp").exists());
    }

    #[tokio::test]
    async fn store_names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let mgr = ConnectionManager::new(StoreConfig::on_disk(&root, SyncMode::OsDefault));

        for bad in ["../escaped", "", ".", "..", "a/b", "a\\b"] {
            let err = mgr.open(bad, 1, video_upgrade).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidStoreName { .. }), "{bad:?}: {err}");
        }
        assert!(!dir.path().join("escaped").exists());
        assert!(!root.join(MANIFEST_FILE).exists());

        let mem = ConnectionManager::in_memory();
        assert!(matches!(
            mem.open("../escaped", 1, video_upgrade).await,
            Err(StoreError::InvalidStoreName { .. })
        ));
    }

    #[tokio::test]
    async fn same_version_reuses_live_handle() {
        let mgr = ConnectionManager::in_memory();
        let a = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        let b = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        a.put(&video("elf")).await.unwrap();
        assert!(b.contains(&name("elf")).await.unwrap());
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[tokio::test]
    async fn concurrent_opens_upgrade_once() {
        let mgr = Arc::new(ConnectionManager::in_memory());
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    mgr.open("videos_db", 1, move |b: &mut SchemaBuilder, old| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        video_upgrade(b, old)
                    })
                    .await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unwritable_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let mgr = ConnectionManager::new(StoreConfig::on_disk(&blocker, SyncMode::OsDefault));
        let err = mgr.open("videos_db", 1, video_upgrade).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(err.is_unavailable());
    }

    // ---- close ---------------------------------------------------------

    #[tokio::test]
    async fn closed_handle_rejects_ops_and_reopen_sees_data() {
        let mgr = ConnectionManager::in_memory();
        let h = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        h.put(&video("frog")).await.unwrap();
        mgr.close(&h).await.unwrap();
        mgr.close(&h).await.unwrap();

        assert!(matches!(h.put(&video("pig")).await, Err(StoreError::Closed)));
        assert!(matches!(h.list_all().await, Err(StoreError::Closed)));

        let again = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        assert!(!again.is_closed());
        assert!(again.get(&name("frog")).await.unwrap().is_some());
    }

    // ---- list_all ------------------------------------------------------

    #[tokio::test]
    async fn list_all_is_ordered_and_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::OsDefault));
        let h = mgr.open("videos_db", 1, video_upgrade).await.unwrap();
        for n in ["rabbit", "crystal", "monster"] {
            h.put(&video(n)).await.unwrap();
        }

        let mut cursor = h.list_all().await.unwrap();
        assert_eq!(cursor.remaining(), 3);
        let first = cursor.next().await.unwrap().unwrap();
        assert_eq!(first.name.as_str(), "crystal");

        // Deleted after the snapshot: skipped.
        h.delete(&name("monster")).await.unwrap();
        let rest = cursor.collect_all().await.unwrap();
        let names: Vec<_> = rest.iter().map(|r| r.name.as_str().to_string()).collect();
        assert_eq!(names, vec!["rabbit"]);

        let again = h.list_all().await.unwrap().collect_all().await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].name.as_str(), "crystal");
    }

    #[tokio::test]
    async fn compact_only_applies_to_file_stores() {
        let mem = ConnectionManager::in_memory();
        let h = mem.open("videos_db", 1, video_upgrade).await.unwrap();
        assert!(h.compact().await.unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let disk = ConnectionManager::new(StoreConfig::on_disk(dir.path(), SyncMode::OsDefault));
        let h = disk.open("videos_db", 1, video_upgrade).await.unwrap();
        h.put(&video("elf")).await.unwrap();
        let report = h.compact().await.unwrap().unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(h.len().await.unwrap(), 1);
    }
}
