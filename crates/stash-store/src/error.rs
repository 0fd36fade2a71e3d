use std::path::PathBuf;

use stash_types::{AssetName, VariantTag};

/// Errors from store and connection operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The host environment refused storage access (permissions, quota,
    /// missing volume). Fatal for the current process.
    #[error("store unavailable at {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record with this name already exists. `put` never overwrites.
    #[error("duplicate key: {0}")]
    DuplicateKey(AssetName),

    /// The store on disk was upgraded past the version being opened.
    #[error("store is at version {on_disk}, cannot open at older version {requested}")]
    VersionTooNew { on_disk: u32, requested: u32 },

    /// Store names double as directory names under the configured root.
    #[error("invalid store name {name:?}: {reason}")]
    InvalidStoreName { name: String, reason: String },

    /// Schema versions start at 1.
    #[error("schema version must be at least 1")]
    InvalidVersion,

    /// The record lacks a variant the schema declares as an index field.
    #[error("record {name} is missing indexed variant {missing_field}")]
    SchemaViolation {
        name: AssetName,
        missing_field: VariantTag,
    },

    /// An upgrade step tried to declare something that already exists or
    /// depends on something that does not.
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// A log entry failed its integrity checks on read.
    #[error("corrupt entry at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The handle was closed or replaced by a newer version.
    #[error("store handle is closed")]
    Closed,

    /// A lock guarding store state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this is an environment-level failure rather than a
    /// per-record one.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Io(_) | Self::Closed | Self::Poisoned
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
