//! Error types for the chat completion pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while assembling or streaming a completion
#[derive(Debug, Error)]
pub enum Error {
    /// Required request fields missing or empty
    #[error("validation error: {0}")]
    Validation(String),

    /// Bot, conversation or module set not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream collaborator (data API, broadcast service) failed
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Embedding error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Completion provider rejected or failed the request
    #[error("completion error: {0}")]
    Completion(String),

    /// Completion stream failed after it started
    #[error("stream error: {0}")]
    Stream(String),

    /// Broadcast channel error
    #[error("broadcast error: {0}")]
    Broadcast(String),

    /// Tokenizer could not be loaded
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the error was caused by the caller rather than the service
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}
