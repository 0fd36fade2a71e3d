use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::name::{AssetName, VariantTag};

/// Domain tag mixed into every record digest.
const RECORD_DOMAIN: &str = "stash-record-v1";

/// BLAKE3 digest over a record's name and full variant set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordDigest([u8; 32]);

impl RecordDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines and listings.
    pub fn short_hex(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordDigest({})", self.short_hex())
    }
}

impl fmt::Display for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The unit of storage: an asset name plus its complete variant set.
///
/// A record is only ever built once every variant has been joined; the
/// stores reject records that are missing a variant the schema declares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub name: AssetName,
    pub variants: BTreeMap<VariantTag, Bytes>,
}

impl AssetRecord {
    pub fn new(name: AssetName, variants: BTreeMap<VariantTag, Bytes>) -> Self {
        Self { name, variants }
    }

    /// Payload for one variant, if present.
    pub fn variant(&self, tag: &VariantTag) -> Option<&Bytes> {
        self.variants.get(tag)
    }

    /// Variant tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = &VariantTag> {
        self.variants.keys()
    }

    /// Sum of all payload sizes.
    pub fn total_bytes(&self) -> u64 {
        self.variants.values().map(|b| b.len() as u64).sum()
    }

    /// Whether every tag in `required` has a payload.
    pub fn has_all<'a>(&self, required: impl IntoIterator<Item = &'a VariantTag>) -> bool {
        required.into_iter().all(|t| self.variants.contains_key(t))
    }

    /// Tags from `required` that this record lacks.
    pub fn missing<'a>(
        &self,
        required: impl IntoIterator<Item = &'a VariantTag>,
    ) -> Vec<VariantTag> {
        required
            .into_iter()
            .filter(|t| !self.variants.contains_key(*t))
            .cloned()
            .collect()
    }

    /// Domain-separated digest over name, tags, and payloads.
    ///
    /// Each field is length-prefixed so that moving bytes between adjacent
    /// fields always changes the digest.
    pub fn digest(&self) -> RecordDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(RECORD_DOMAIN.as_bytes());
        hasher.update(b":");
        update_framed(&mut hasher, self.name.as_str().as_bytes());
        hasher.update(&(self.variants.len() as u64).to_le_bytes());
        for (tag, payload) in &self.variants {
            update_framed(&mut hasher, tag.as_str().as_bytes());
            update_framed(&mut hasher, payload);
        }
        RecordDigest(*hasher.finalize().as_bytes())
    }
}

fn update_framed(hasher: &mut blake3::Hasher, data: &[u8]) {
    hasher.update(&(data.len() as u64).to_le_bytes());
    hasher.update(data);
}
