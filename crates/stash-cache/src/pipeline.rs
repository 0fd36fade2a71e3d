//! Live view of in-flight pipelines.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use stash_types::AssetName;
use tracing::debug;

/// Stage of one pipeline.
///
/// `Pending -> Lookup -> Hit -> Resolved` on a hit, and
/// `Pending -> Lookup -> Miss -> Fetching -> Joining -> Persisting -> Resolved`
/// on a miss. A failure ends the pipeline from any stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Pending,
    Lookup,
    Hit,
    Miss,
    Fetching,
    Joining,
    Persisting,
    Resolved,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Lookup => "lookup",
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Fetching => "fetching",
            Self::Joining => "joining",
            Self::Persisting => "persisting",
            Self::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

/// Unique per launched pipeline, so duplicates for one name stay apart.
pub type PipelineId = u64;

#[derive(Default)]
struct TrackerInner {
    next_id: AtomicU64,
    live: Mutex<HashMap<PipelineId, (AssetName, PipelineState)>>,
}

/// Registry of in-flight pipelines keyed by [`PipelineId`].
#[derive(Clone, Default)]
pub struct PipelineTracker {
    inner: Arc<TrackerInner>,
}

impl PipelineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline in `Pending`. The entry is removed when the
    /// returned guard drops, whether the pipeline finished or was aborted.
    pub fn begin(&self, name: &AssetName) -> PipelineGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut live) = self.inner.live.lock() {
            live.insert(id, (name.clone(), PipelineState::Pending));
        }
        debug!(pipeline = id, name = %name, state = %PipelineState::Pending, "pipeline started");
        PipelineGuard {
            id,
            name: name.clone(),
            tracker: self.clone(),
        }
    }

    /// Current stage of every live pipeline.
    pub fn snapshot(&self) -> Vec<(PipelineId, AssetName, PipelineState)> {
        let Ok(live) = self.inner.live.lock() else {
            return Vec::new();
        };
        let mut out: Vec<_> = live
            .iter()
            .map(|(id, (name, state))| (*id, name.clone(), *state))
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out
    }

    /// Number of live pipelines for `name`.
    pub fn live_for(&self, name: &AssetName) -> usize {
        self.inner
            .live
            .lock()
            .map(|live| live.values().filter(|(n, _)| n == name).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PipelineTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTracker")
            .field("live", &self.len())
            .finish()
    }
}

/// Handle to one tracked pipeline.
pub struct PipelineGuard {
    id: PipelineId,
    name: AssetName,
    tracker: PipelineTracker,
}

impl PipelineGuard {
    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn advance(&self, state: PipelineState) {
        if let Ok(mut live) = self.tracker.inner.live.lock() {
            if let Some(entry) = live.get_mut(&self.id) {
                entry.1 = state;
            }
        }
        debug!(pipeline = self.id, name = %self.name, %state, "pipeline advanced");
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if let Ok(mut live) = self.tracker.inner.live.lock() {
            live.remove(&self.id);
        }
    }
}
