//! Store schema and manifest.
//!
//! The schema is built by upgrade steps (see [`crate::ConnectionManager::open`])
//! and persisted next to the data as `MANIFEST.json`. Records are always
//! keyed by asset name; indexes declare which variant fields every record
//! must carry.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use stash_types::{AssetRecord, VariantTag};

use crate::error::{StoreError, StoreResult};

/// File name of the manifest inside a store directory.
pub const MANIFEST_FILE: &str = "MANIFEST.json";

/// The only key path records support.
pub const NAME_KEY_PATH: &str = "name";

/// A declared (non-unique) index over one variant field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub field: VariantTag,
}

/// Structural description of a store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// `Some("name")` once the record container exists.
    pub key_path: Option<String>,
    pub indexes: Vec<IndexSpec>,
}

impl Schema {
    pub fn has_container(&self) -> bool {
        self.key_path.is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Variant fields every record must carry.
    pub fn required_variants(&self) -> impl Iterator<Item = &VariantTag> {
        self.indexes.iter().map(|i| &i.field)
    }

    /// Check a record before it is written.
    pub fn validate(&self, record: &AssetRecord) -> StoreResult<()> {
        if !self.has_container() {
            return Err(StoreError::SchemaConflict(
                "no record container; run an upgrade that calls create_container".into(),
            ));
        }
        if let Some(missing) = record.missing(self.required_variants()).into_iter().next() {
            return Err(StoreError::SchemaViolation {
                name: record.name.clone(),
                missing_field: missing,
            });
        }
        Ok(())
    }
}

/// Mutable view of the schema handed to an upgrade step.
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub(crate) fn from_schema(schema: Schema) -> Self {
        Self { schema }
    }

    /// Create the record container keyed by `key_path`.
    ///
    /// Only `"name"` is supported. Fails if the container already exists.
    pub fn create_container(&mut self, key_path: &str) -> StoreResult<&mut Self> {
        if key_path != NAME_KEY_PATH {
            return Err(StoreError::SchemaConflict(format!(
                "unsupported key path {key_path:?}; records are keyed by {NAME_KEY_PATH:?}"
            )));
        }
        if self.schema.has_container() {
            return Err(StoreError::SchemaConflict("record container already exists".into()));
        }
        self.schema.key_path = Some(key_path.to_string());
        Ok(self)
    }

    /// Declare a searchable variant field.
    pub fn create_index(&mut self, name: &str, field: VariantTag) -> StoreResult<&mut Self> {
        if !self.schema.has_container() {
            return Err(StoreError::SchemaConflict(format!(
                "cannot create index {name:?} before the record container"
            )));
        }
        if self.schema.index(name).is_some() {
            return Err(StoreError::SchemaConflict(format!("index {name:?} already exists")));
        }
        self.schema.indexes.push(IndexSpec {
            name: name.to_string(),
            field,
        });
        Ok(self)
    }

    /// Drop a previously declared index.
    pub fn delete_index(&mut self, name: &str) -> StoreResult<&mut Self> {
        let before = self.schema.indexes.len();
        self.schema.indexes.retain(|i| i.name != name);
        if self.schema.indexes.len() == before {
            return Err(StoreError::SchemaConflict(format!("index {name:?} does not exist")));
        }
        Ok(self)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn finish(self) -> Schema {
        self.schema
    }
}

/// Persisted store metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub store: String,
    pub version: u32,
    pub schema: Schema,
}

impl Manifest {
    /// Read the manifest from `dir`. `Ok(None)` if the store was never created.
    pub fn load(dir: &Path) -> StoreResult<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Unavailable { path, source: e }),
        };
        let manifest = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))?;
        Ok(Some(manifest))
    }

    /// Write the manifest atomically: temp file, fsync, rename.
    ///
    /// A crash before the rename leaves the previous manifest in place, so
    /// an interrupted upgrade runs again on the next open.
    pub fn store(&self, dir: &Path) -> StoreResult<()> {
        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|source| StoreError::Unavailable { path, source })
    }
}
