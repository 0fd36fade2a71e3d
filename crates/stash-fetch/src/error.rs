use std::io;

/// Errors from fetching a variant payload.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The source answered with a non-success status.
    #[error("{locator}: HTTP {status}")]
    Status { locator: String, status: u16 },

    /// The request never produced a response (DNS, connect, TLS, reset).
    #[error("{locator}: transport error: {source}")]
    Transport {
        locator: String,
        #[source]
        source: reqwest::Error,
    },

    /// The source has nothing at this locator.
    #[error("{locator}: not found")]
    NotFound { locator: String },

    /// Local read failure.
    #[error("{locator}: {source}")]
    Io {
        locator: String,
        #[source]
        source: io::Error,
    },

    /// The locator cannot be resolved against this source.
    #[error("invalid locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport faults, 5xx, 408 and 429 are transient. Everything else,
    /// including a missing resource, is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            Self::Transport { source, .. } => !source.is_builder(),
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            Self::NotFound { .. } | Self::InvalidLocator { .. } => false,
        }
    }

    /// The locator the failed request was for.
    pub fn locator(&self) -> &str {
        match self {
            Self::Status { locator, .. }
            | Self::Transport { locator, .. }
            | Self::NotFound { locator }
            | Self::Io { locator, .. }
            | Self::InvalidLocator { locator, .. } => locator,
        }
    }
}

/// Result alias for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;
