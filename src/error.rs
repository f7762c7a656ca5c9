// src/error.rs

//! Error types for chart catalog synchronization

use thiserror::Error;

/// Errors raised while indexing repositories and maintaining the catalog
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP failure (non-2xx status, connection error)
    #[error("transport error: {0}")]
    TransportError(String),

    /// Malformed index, document or configuration content
    #[error("parse error: {0}")]
    ParseError(String),

    /// Catalog store read/write or transaction failure
    #[error("store error: {0}")]
    StoreError(String),

    /// Per-version artifact failure (archive extraction, icon decoding)
    #[error("artifact error: {0}")]
    ArtifactError(String),

    /// Input ended before a complete archive block could be read
    #[error("unexpected end of data: {0}")]
    UnexpectedEof(String),

    /// Repository object is not ready to be indexed
    #[error("repository not ready: {0}")]
    NotReady(String),

    /// Client or store could not be constructed
    #[error("initialization error: {0}")]
    InitError(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

/// Result type alias for chartsync operations
pub type Result<T> = std::result::Result<T, Error>;
