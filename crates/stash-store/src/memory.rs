use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use stash_types::{AssetName, AssetRecord};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::schema::Schema;
use crate::traits::{AssetStore, StoreStats};

/// In-memory, `BTreeMap`-based record store.
///
/// Intended for tests and embedding. Records live behind a `RwLock`; each
/// operation takes the lock once, which makes it atomic. Payloads are
/// `Bytes`, so cloning a record on read does not copy the data.
pub struct InMemoryAssetStore {
    records: RwLock<BTreeMap<AssetName, AssetRecord>>,
    schema: RwLock<Schema>,
}

impl InMemoryAssetStore {
    /// Create an empty store with the given schema.
    pub fn new(schema: Schema) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            schema: RwLock::new(schema),
        }
    }

    /// Replace the schema after an upgrade. Existing records are kept.
    pub(crate) fn set_schema(&self, schema: Schema) -> StoreResult<()> {
        *self.schema.write().map_err(|_| StoreError::Poisoned)? = schema;
        Ok(())
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        match self.records.read() {
            Ok(map) => map.len(),
            Err(poisoned) => {
                warn!("record map lock poisoned; reading through it");
                poisoned.into_inner().len()
            }
        }
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAssetStore {
    fn default() -> Self {
        Self::new(Schema::default())
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn get(&self, name: &AssetName) -> StoreResult<Option<AssetRecord>> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(name).cloned())
    }

    async fn put(&self, record: &AssetRecord) -> StoreResult<()> {
        self.schema
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .validate(record)?;

        let mut map = self.records.write().map_err(|_| StoreError::Poisoned)?;
        match map.entry(record.name.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(record.name.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn delete(&self, name: &AssetName) -> StoreResult<bool> {
        let mut map = self.records.write().map_err(|_| StoreError::Poisoned)?;
        Ok(map.remove(name).is_some())
    }

    async fn keys(&self) -> StoreResult<Vec<AssetName>> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.keys().cloned().collect())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(StoreStats {
            records: map.len(),
            total_bytes: map.values().map(AssetRecord::total_bytes).sum(),
            log_bytes: None,
        })
    }

    fn schema(&self) -> Schema {
        // A schema is replaced whole, so a poisoned lock still guards a
        // valid one. Falling back to an empty schema would drop the index
        // requirements callers check plans against.
        match self.schema.read() {
            Ok(schema) => schema.clone(),
            Err(poisoned) => {
                warn!("schema lock poisoned; reading through it");
                poisoned.into_inner().clone()
            }
        }
    }

    async fn contains(&self, name: &AssetName) -> StoreResult<bool> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.contains_key(name))
    }
}

impl std::fmt::Debug for InMemoryAssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAssetStore")
            .field("record_count", &self.len())
            .finish()
    }
}
