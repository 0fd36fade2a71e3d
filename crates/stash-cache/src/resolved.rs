use std::collections::BTreeMap;

use bytes::Bytes;
use stash_types::{AssetName, AssetRecord, VariantTag};

/// Where a resolved asset's bytes came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Served from the store; no network access.
    Store,
    /// Fetched. `persisted` is false when a concurrent pipeline for the
    /// same name wrote its copy first.
    Network { persisted: bool },
}

/// Display-ready variant payloads for one asset.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAsset {
    pub name: AssetName,
    pub variants: BTreeMap<VariantTag, Bytes>,
    pub origin: Origin,
}

impl ResolvedAsset {
    pub(crate) fn from_store(record: AssetRecord) -> Self {
        Self {
            name: record.name,
            variants: record.variants,
            origin: Origin::Store,
        }
    }

    pub fn variant(&self, tag: &VariantTag) -> Option<&Bytes> {
        self.variants.get(tag)
    }

    pub fn total_bytes(&self) -> u64 {
        self.variants.values().map(|b| b.len() as u64).sum()
    }

    pub fn is_hit(&self) -> bool {
        self.origin == Origin::Store
    }
}
