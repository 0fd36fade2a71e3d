//! Cache-aside orchestration for Stash.
//!
//! [`CacheAside::resolve`] serves an asset from the store when present and
//! otherwise fetches every variant concurrently, joins them, persists one
//! complete record, and hands the payloads to a [`DisplaySink`].
//!
//! # Pipeline
//!
//! ```text
//! Pending -> Lookup -> Hit -----------------------------------------> Resolved
//!                   -> Miss -> Fetching -> Joining -> Persisting ---> Resolved
//! ```
//!
//! # Design Rules
//!
//! 1. A record is written only after all of its variants arrived.
//! 2. One failed variant fails the whole pipeline; nothing is persisted.
//! 3. `DuplicateKey` on persist means another pipeline won the race. The
//!    fetched bytes are still presented.
//! 4. Pipelines are independent: one failure never touches another.
//! 5. Fetch and join are bounded by a timeout and abort on shutdown.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod resolved;
pub mod sink;
pub mod stats;

pub use config::{CacheConfig, FetchSection, StashConfig, StoreSection, DEFAULT_FETCH_TIMEOUT};
pub use error::{CacheError, CacheResult};
pub use orchestrator::CacheAside;
pub use pipeline::{PipelineGuard, PipelineId, PipelineState, PipelineTracker};
pub use resolved::{Origin, ResolvedAsset};
pub use sink::{DisplaySink, LogSink, NullSink};
pub use stats::{CacheStats, StatsSnapshot};
