use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::{FetchError, FetchResult};
use crate::traits::VariantFetcher;

/// Fetches locators relative to a base URL over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    base: Url,
}

impl HttpFetcher {
    /// Build a fetcher with a default client.
    pub fn new(base_url: &str) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("stash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Transport {
                locator: base_url.to_string(),
                source,
            })?;
        Self::with_client(client, base_url)
    }

    /// Build a fetcher around an existing client.
    pub fn with_client(client: Client, base_url: &str) -> FetchResult<Self> {
        let mut base = Url::parse(base_url).map_err(|e| FetchError::InvalidLocator {
            locator: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(FetchError::InvalidLocator {
                locator: base_url.to_string(),
                reason: "not a base URL".into(),
            });
        }
        // Without a trailing slash `join` would replace the last segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve `locator` against the base URL.
    pub fn url_for(&self, locator: &str) -> FetchResult<Url> {
        if locator.is_empty() {
            return Err(FetchError::InvalidLocator {
                locator: String::new(),
                reason: "empty".into(),
            });
        }
        let url = self
            .base
            .join(locator)
            .map_err(|e| FetchError::InvalidLocator {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;
        // Fragments never reach the server; two locators differing only
        // there would fetch the same resource.
        if url.fragment().is_some() {
            return Err(FetchError::InvalidLocator {
                locator: locator.to_string(),
                reason: "contains a fragment".into(),
            });
        }
        Ok(url)
    }
}

#[async_trait]
impl VariantFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> FetchResult<Bytes> {
        let url = self.url_for(locator)?;
        let transport = |source| FetchError::Transport {
            locator: locator.to_string(),
            source,
        };

        let response = self.client.get(url.clone()).send().await.map_err(transport)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                locator: locator.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                locator: locator.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        debug!(%url, bytes = body.len(), "fetched");
        Ok(body)
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}
