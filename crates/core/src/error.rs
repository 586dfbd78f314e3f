//! Error types for analysis-bridge-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied SAN move could not be played. `index` is the
    /// position of the offending move in the submitted list.
    #[error("Invalid SAN move '{san}' at index {index}: {reason}")]
    InvalidMove {
        san: String,
        index: usize,
        reason: String,
    },

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Engine not running")]
    NotRunning,

    #[error("Failed to start engine: {0}")]
    EngineUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
