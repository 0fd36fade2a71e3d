use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum length of an asset name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a variant tag in bytes.
pub const MAX_TAG_LEN: usize = 32;

/// Primary key of a stored asset.
///
/// Names are immutable once a record is created. They must be non-empty,
/// at most [`MAX_NAME_LEN`] bytes, and free of path separators, control
/// characters and URL delimiters (`#`, `?`, `%`) so that they can double as
/// locator path segments.
///
/// Ordering is by raw byte value; stores list records in this order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetName(String);

impl AssetName {
    /// Validate and wrap a name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_NAME_LEN {
            Some("longer than 255 bytes")
        } else if name.chars().any(|c| c == '/' || c == '\\') {
            Some("must not contain path separators")
        } else if name.chars().any(char::is_control) {
            Some("must not contain control characters")
        } else if name.contains(['#', '?', '%']) {
            Some("must not contain '#', '?' or '%'")
        } else if name == "." || name == ".." {
            Some("reserved path component")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TypeError::InvalidAssetName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AssetName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AssetName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AssetName> for String {
    fn from(name: AssetName) -> Self {
        name.0
    }
}

impl AsRef<str> for AssetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of one binary encoding of an asset (`mp4`, `webm`, ...).
///
/// Tags are lowercase ASCII alphanumerics plus `-` and `_`, 1 to
/// [`MAX_TAG_LEN`] bytes. Input is lowercased before validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariantTag(String);

impl VariantTag {
    pub fn new(tag: impl Into<String>) -> Result<Self, TypeError> {
        let tag = tag.into().to_ascii_lowercase();
        let reason = if tag.is_empty() {
            Some("must not be empty")
        } else if tag.len() > MAX_TAG_LEN {
            Some("longer than 32 bytes")
        } else if !tag
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
        {
            Some("only a-z, 0-9, '-' and '_' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TypeError::InvalidVariantTag { tag, reason }),
            None => Ok(Self(tag)),
        }
    }

    pub fn mp4() -> Self {
        Self("mp4".into())
    }

    pub fn webm() -> Self {
        Self("webm".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Media type a display sink should attach to this variant's bytes.
    pub fn media_type(&self) -> &'static str {
        match self.0.as_str() {
            "mp4" | "m4v" => "video/mp4",
            "webm" => "video/webm",
            "ogg" | "ogv" => "video/ogg",
            "mp3" => "audio/mpeg",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VariantTag {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VariantTag {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VariantTag> for String {
    fn from(tag: VariantTag) -> Self {
        tag.0
    }
}
