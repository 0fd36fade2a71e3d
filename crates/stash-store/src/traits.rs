use async_trait::async_trait;
use stash_types::{AssetName, AssetRecord};

use crate::error::StoreResult;
use crate::schema::Schema;

/// Size summary of a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live records.
    pub records: usize,
    /// Payload bytes across live records.
    pub total_bytes: u64,
    /// Bytes on disk, including superseded and deleted entries. `None` for
    /// volatile backends.
    pub log_bytes: Option<u64>,
}

/// Transactional key-value store for asset records.
///
/// All implementations must satisfy these invariants:
/// - `put` is create-or-fail. It never overwrites an existing record and
///   fails with [`crate::StoreError::DuplicateKey`] instead.
/// - A `put` either commits the whole record or nothing; readers never
///   observe a partially written record.
/// - `delete` of an absent name succeeds (returns `false`).
/// - `keys` returns names in ascending primary-key order.
/// - Each call is atomic on its own; there is no cross-call locking.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Read a record by name.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    async fn get(&self, name: &AssetName) -> StoreResult<Option<AssetRecord>>;

    /// Insert a record that does not exist yet.
    async fn put(&self, record: &AssetRecord) -> StoreResult<()>;

    /// Delete a record. Returns `true` if it existed.
    async fn delete(&self, name: &AssetName) -> StoreResult<bool>;

    /// All live names, ascending.
    async fn keys(&self) -> StoreResult<Vec<AssetName>>;

    /// Size summary.
    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Schema records are validated against.
    fn schema(&self) -> Schema;

    /// Whether a record with this name exists.
    async fn contains(&self, name: &AssetName) -> StoreResult<bool> {
        Ok(self.keys().await?.binary_search(name).is_ok())
    }

    /// Flush any buffered state. The store must not be used afterwards.
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
