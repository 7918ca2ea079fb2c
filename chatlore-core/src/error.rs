//! Error types for chatlore-core

use thiserror::Error;

/// Main error type for the chatlore-core library
#[derive(Error, Debug)]
pub enum Error {
    /// No registered format descriptor matched the file
    #[error("unrecognized format: {0}")]
    UnrecognizedFormat(String),

    /// Fatal structural failure inside one parser
    #[error("parse error in {format} file: {message}")]
    Parse { format: String, message: String },

    /// A parse structurally succeeded but persisted zero messages
    #[error("no messages written: the import produced zero valid rows")]
    NoMessagesWritten,

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session store not found
    #[error("session store not found: {0}")]
    SessionNotFound(String),

    /// Operation cancelled via the cancellation token
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Build a parse error for the given format id.
    pub fn parse(format: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse {
            format: format.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for chatlore-core
pub type Result<T> = std::result::Result<T, Error>;
