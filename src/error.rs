//! Error types for keyseq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("task handle {ticket} missing from queue for key {key}")]
    HandleMissing { key: String, ticket: u64 },

    #[error("work for key {key} panicked: {message}")]
    WorkPanicked { key: String, message: String },

    #[error("work for key {key} was cancelled before it settled")]
    Cancelled { key: String },

    #[error("no tokio runtime available: {0}")]
    Runtime(String),

    #[error("timer unavailable: {0}")]
    Timer(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
