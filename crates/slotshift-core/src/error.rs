//! Error types shared by provider implementations and config parsing.

use thiserror::Error;

/// Result type alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by a provider API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("operation not supported by provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transport(_))
    }
}

/// Errors raised while reading `slotshift.toml` or manifests.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration {value:?} for {field}")]
    Duration { field: String, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: String },

    #[error("invalid {kind} manifest: {reason}")]
    Manifest { kind: String, reason: String },
}
