use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{FetchError, FetchResult};
use crate::traits::VariantFetcher;

/// Locator-keyed payload map. For tests and embedding.
///
/// Counts every request, including ones for missing locators.
#[derive(Default)]
pub struct InMemoryFetcher {
    payloads: RwLock<HashMap<String, Bytes>>,
    requests: AtomicUsize,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, payload: impl Into<Bytes>) {
        if let Ok(mut map) = self.payloads.write() {
            map.insert(locator.into(), payload.into());
        }
    }

    pub fn remove(&self, locator: &str) -> Option<Bytes> {
        self.payloads.write().ok()?.remove(locator)
    }

    /// Number of `fetch` calls so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VariantFetcher for InMemoryFetcher {
    async fn fetch(&self, locator: &str) -> FetchResult<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .read()
            .ok()
            .and_then(|map| map.get(locator).cloned())
            .ok_or_else(|| FetchError::NotFound {
                locator: locator.to_string(),
            })
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

impl std::fmt::Debug for InMemoryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.payloads.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("InMemoryFetcher")
            .field("payload_count", &count)
            .field("requests", &self.requests())
            .finish()
    }
}
