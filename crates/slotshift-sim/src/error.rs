//! Errors from loading or saving a simulated world.

use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to access world file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid world file: {0}")]
    Json(#[source] serde_json::Error),
}
