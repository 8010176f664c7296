//! Error types for domshot

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for domshot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing or executing a render
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid request or configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The host ran but no usable image was produced
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// The composed script could not be executed
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// The rendering host could not be started or supervised
    #[error("Rendering host error: {0}")]
    HostError(String),

    /// Host process exceeded its time budget
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Filesystem error
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
