use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{FetchError, FetchResult};
use crate::traits::VariantFetcher;

/// Serves locators as relative paths under a local directory.
#[derive(Clone, Debug)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a locator to a path inside the root. Only plain relative
    /// components are allowed.
    pub fn path_for(&self, locator: &str) -> FetchResult<PathBuf> {
        let invalid = |reason: &str| FetchError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };
        if locator.is_empty() {
            return Err(invalid("empty"));
        }
        let rel = Path::new(locator);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(invalid("parent components are not allowed")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("absolute paths are not allowed"))
                }
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl VariantFetcher for DirFetcher {
    async fn fetch(&self, locator: &str) -> FetchResult<Bytes> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(path = %path.display(), bytes = data.len(), "read");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FetchError::NotFound {
                locator: locator.to_string(),
            }),
            Err(source) => Err(FetchError::Io {
                locator: locator.to_string(),
                source,
            }),
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
