//! Error types for Formulary operations.
//!
//! This module provides a common `Error` type and `Result<T>` alias used across
//! all Formulary crates. Uses `thiserror` for derive macros.
//!
//! Collaborator failures (embedding service, search index) are ordinary
//! values: the search engine inspects them to decide whether a sub-query can
//! be skipped or whether the whole request has to fail.

use thiserror::Error;

/// Errors that can occur in Formulary operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid data or format.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The caller sent a request the engine refuses to run.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The embedding collaborator failed or returned an unusable vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The search index rejected or failed a query.
    #[error("Index error: {0}")]
    Index(String),

    /// A collaborator call did not finish before the request deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No partial result is possible: every primary sub-query failed.
    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an embedding error.
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a search-unavailable error.
    pub fn search_unavailable(msg: impl Into<String>) -> Self {
        Self::SearchUnavailable(msg.into())
    }

    /// Whether a collaborator call that produced this error may succeed if
    /// attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Index(_) | Self::Timeout(_))
    }

    /// Whether this error means the search engine is degraded, as opposed
    /// to the request having matched nothing.
    pub fn is_search_unavailable(&self) -> bool {
        matches!(self, Self::SearchUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using Formulary's Error type.
pub type Result<T> = std::result::Result<T, Error>;
