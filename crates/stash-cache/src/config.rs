use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_fetch::{DirFetcher, HttpFetcher, RetryPolicy, VariantFetcher};
use stash_store::{
    validate_store_name, ConnectionManager, SchemaBuilder, StoreConfig, StoreHandle, StoreResult,
    SyncMode, NAME_KEY_PATH,
};
use stash_types::{AssetName, FetchPlan, LocatorTemplate};

use crate::error::{CacheError, CacheResult};

/// Default fetch + join timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Data directory used when `store.root` is not configured.
pub const DEFAULT_STORE_ROOT: &str = "stash-data";

/// Per-pipeline knobs.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Upper bound on fetch + join, retries included.
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryPolicy::none(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// Data directory, relative to the working directory unless absolute.
    /// Only an explicit `None` from code keeps stores in memory.
    pub root: Option<PathBuf>,
    pub name: String,
    pub schema_version: u32,
    pub sync: SyncMode,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: Some(PathBuf::from(DEFAULT_STORE_ROOT)),
            name: "videos_db".into(),
            schema_version: 1,
            sync: SyncMode::OsDefault,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSection {
    pub base_url: Option<String>,
    pub dir: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Total attempts per variant; `1` disables retry.
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            base_url: None,
            dir: None,
            timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            retry_attempts: 1,
            retry_base_ms: 250,
        }
    }
}

/// Top-level configuration, usually read from `stash.toml`.
///
/// ```toml
/// assets = ["crystal", "elf"]
///
/// [store]
/// root = "./data"
/// sync = "every-write"
///
/// [fetch]
/// base_url = "https://cdn.example/media/"
/// retry_attempts = 3
///
/// [[variants]]
/// tag = "mp4"
/// pattern = "videos/{name}.{tag}"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StashConfig {
    pub store: StoreSection,
    pub fetch: FetchSection,
    pub assets: Vec<AssetName>,
    pub variants: Vec<LocatorTemplate>,
}

impl Default for StashConfig {
    fn default() -> Self {
        let assets = ["crystal", "elf", "frog", "monster", "pig", "rabbit"]
            .into_iter()
            .filter_map(|n| AssetName::new(n).ok())
            .collect();
        Self {
            store: StoreSection::default(),
            fetch: FetchSection::default(),
            assets,
            variants: LocatorTemplate::video_pair(),
        }
    }
}

impl StashConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
            .map_err(|e| CacheError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> CacheResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> CacheResult<()> {
        validate_store_name(&self.store.name).map_err(|e| CacheError::Config(e.to_string()))?;
        if self.store.schema_version == 0 {
            return Err(CacheError::Config("store.schema_version must be at least 1".into()));
        }
        if self.fetch.base_url.is_some() && self.fetch.dir.is_some() {
            return Err(CacheError::Config(
                "fetch.base_url and fetch.dir are mutually exclusive".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(CacheError::Config("fetch.timeout_secs must be positive".into()));
        }
        for t in &self.variants {
            // Re-run template validation: deserialization bypasses it.
            LocatorTemplate::new(t.tag.clone(), t.pattern.clone())?;
        }
        if let Some(first) = self.assets.first() {
            LocatorTemplate::plan_for(&self.variants, first)?;
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.store.root.clone(),
            sync_mode: self.store.sync,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        let retry = if self.fetch.retry_attempts > 1 {
            RetryPolicy::exponential(
                self.fetch.retry_attempts,
                Duration::from_millis(self.fetch.retry_base_ms),
            )
        } else {
            RetryPolicy::none()
        };
        CacheConfig {
            fetch_timeout: Duration::from_secs(self.fetch.timeout_secs),
            retry,
        }
    }

    /// The fetcher named by the `[fetch]` section.
    pub fn fetcher(&self) -> CacheResult<Arc<dyn VariantFetcher>> {
        match (&self.fetch.base_url, &self.fetch.dir) {
            (Some(url), None) => {
                let f = HttpFetcher::new(url).map_err(|e| CacheError::Config(e.to_string()))?;
                Ok(Arc::new(f))
            }
            (None, Some(dir)) => Ok(Arc::new(DirFetcher::new(dir))),
            (None, None) => Err(CacheError::Config(
                "no source configured; set fetch.base_url or fetch.dir".into(),
            )),
            (Some(_), Some(_)) => Err(CacheError::Config(
                "fetch.base_url and fetch.dir are mutually exclusive".into(),
            )),
        }
    }

    /// Schema upgrade for the configured variants: create the record
    /// container if missing, then index every variant tag not indexed yet.
    pub fn upgrade(&self, builder: &mut SchemaBuilder, _old_version: u32) -> StoreResult<()> {
        if !builder.schema().has_container() {
            builder.create_container(NAME_KEY_PATH)?;
        }
        for t in &self.variants {
            if builder.schema().index(t.tag.as_str()).is_none() {
                builder.create_index(t.tag.as_str(), t.tag.clone())?;
            }
        }
        Ok(())
    }

    /// Open the configured store, upgrading it if needed.
    pub async fn open_store(&self, manager: &ConnectionManager) -> CacheResult<StoreHandle> {
        let handle = manager
            .open(&self.store.name, self.store.schema_version, |b, old| self.upgrade(b, old))
            .await?;
        Ok(handle)
    }

    /// Fetch plan for `name` built from the variant templates.
    pub fn plan_for(&self, name: &AssetName) -> CacheResult<FetchPlan> {
        LocatorTemplate::plan_for(&self.variants, name).map_err(|e| CacheError::InvalidPlan {
            name: name.clone(),
            reason: e.to_string(),
        })
    }
}
