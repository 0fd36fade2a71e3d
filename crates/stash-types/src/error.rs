use thiserror::Error;

/// Errors produced by type construction and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid asset name {name:?}: {reason}")]
    InvalidAssetName { name: String, reason: &'static str },

    #[error("invalid variant tag {tag:?}: {reason}")]
    InvalidVariantTag { tag: String, reason: &'static str },

    #[error("fetch plan has no variants")]
    EmptyPlan,

    #[error("fetch plan lists variant {0} more than once")]
    DuplicateVariant(String),

    #[error("invalid locator template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: &'static str },
}
