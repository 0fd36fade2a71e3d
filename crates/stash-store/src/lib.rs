//! Versioned, transactional record store for Stash.
//!
//! A store holds [`AssetRecord`](stash_types::AssetRecord)s keyed by asset
//! name. Stores are opened through a [`ConnectionManager`] at a schema
//! version; a missing or older store is first brought up to date by an
//! upgrade callback that declares the record container and its indexes.
//!
//! # Storage Backends
//!
//! All backends implement the [`AssetStore`] trait:
//!
//! - [`InMemoryAssetStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`FileAssetStore`] -- append-only CRC-framed record log with an
//!   in-memory name index, replayed on open
//!
//! # Design Rules
//!
//! 1. `put` is create-or-fail; records are never overwritten in place.
//! 2. A record is committed whole or not at all.
//! 3. Every record carries each variant its schema indexes.
//! 4. The manifest is replaced atomically, so an interrupted upgrade re-runs.

pub mod connection;
pub mod error;
pub mod file;
mod log;
pub mod memory;
pub mod schema;
pub mod traits;

pub use connection::{validate_store_name, ConnectionManager, RecordCursor, StoreConfig, StoreHandle};
pub use error::{StoreError, StoreResult};
pub use file::{CompactReport, FileAssetStore};
pub use log::SyncMode;
pub use memory::InMemoryAssetStore;
pub use schema::{IndexSpec, Manifest, Schema, SchemaBuilder, MANIFEST_FILE, NAME_KEY_PATH};
pub use traits::{AssetStore, StoreStats};
