use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchResult;

/// Source of variant payloads.
///
/// A fetch is one request for one locator with a single success-or-failure
/// outcome. Implementations do not retry or cache; see
/// [`crate::fetch_with_retry`] for the retry layer.
#[async_trait]
pub trait VariantFetcher: Send + Sync {
    /// Fetch the full payload at `locator`.
    async fn fetch(&self, locator: &str) -> FetchResult<Bytes>;

    /// Short description for logs, e.g. the base URL.
    fn describe(&self) -> String;
}
