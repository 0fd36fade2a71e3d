use std::time::Duration;

use stash_fetch::FetchError;
use stash_store::StoreError;
use stash_types::{AssetName, TypeError, VariantTag};

/// Errors from a cache-aside pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A variant fetch failed. Nothing was persisted.
    #[error("fetching {variant} for {name} failed: {source}")]
    NetworkFailure {
        name: AssetName,
        variant: VariantTag,
        #[source]
        source: FetchError,
    },

    /// A variant task ended without a result (panic or abort) before the
    /// join completed. Nothing was persisted.
    #[error("{name}: variants never arrived: {}", join_tags(missing))]
    PartialAsset {
        name: AssetName,
        missing: Vec<VariantTag>,
    },

    /// Fetch and join did not finish in time. Nothing was persisted.
    #[error("{name}: fetch timed out after {after:?}")]
    Timeout { name: AssetName, after: Duration },

    /// Shutdown was requested before the record was written.
    #[error("{name}: cancelled by shutdown")]
    Cancelled { name: AssetName },

    /// The store failed. Fatal for the process when
    /// [`StoreError::is_unavailable`] holds.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The fetch plan cannot produce a record the store accepts.
    #[error("invalid fetch plan for {name}: {reason}")]
    InvalidPlan { name: AssetName, reason: String },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether this pipeline failed on the network side: a fetch error, a
    /// partial join, or a timeout.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure { .. } | Self::PartialAsset { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the failure is environment-level and should stop the process.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::StoreUnavailable(e) => e.is_unavailable(),
            Self::Config(_) => true,
            _ => false,
        }
    }
}

impl From<TypeError> for CacheError {
    fn from(e: TypeError) -> Self {
        Self::Config(e.to_string())
    }
}

fn join_tags(tags: &[VariantTag]) -> String {
    tags.iter()
        .map(VariantTag::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
