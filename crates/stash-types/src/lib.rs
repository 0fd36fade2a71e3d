//! Foundation types for Stash.
//!
//! Stash is a cache-aside store for binary assets that come in several
//! encodings ("variants"), e.g. the MP4 and WebM renditions of one video.
//! Every other Stash crate depends on `stash-types`.
//!
//! # Key Types
//!
//! - [`AssetName`] — Validated primary key of a stored asset
//! - [`VariantTag`] — Validated name of one encoding (`mp4`, `webm`, ...)
//! - [`AssetRecord`] — The unit of storage: a name plus a full variant set
//! - [`FetchPlan`] — Which variants to fetch for an asset, and from where
//! - [`LocatorTemplate`] — Builds per-asset locators from a pattern

pub mod error;
pub mod name;
pub mod plan;
pub mod record;

pub use error::TypeError;
pub use name::{AssetName, VariantTag};
pub use plan::{FetchPlan, LocatorTemplate, VariantSpec};
pub use record::{AssetRecord, RecordDigest};
