//! Error handling for the ingestion and conflict-detection pipeline.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type. Wraps the per-subsystem error enums below.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("embed error: {0}")]
    Embed(#[from] EmbedError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Decoding raw bytes of an uploaded artifact into normalized text failed.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),

    #[error("decoding failed: {detail}")]
    DecodeFailed { detail: String },

    #[error("empty output after parsing")]
    EmptyOutput,

    #[error("fetch failed: {0}")]
    FetchFailed(String),
}

/// Splitting normalized text into token-bounded chunks failed.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),

    #[error("persist failed: {0}")]
    PersistFailed(String),
}

/// Mapping text to a vector failed.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("timeout")]
    Timeout,
}

/// A vector index operation (upsert, search, delete) failed.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("upsert failed: {0}")]
    UpsertFailed(String),

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("point not found: {0}")]
    PointNotFound(String),
}

/// A relational store operation failed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not initialized")]
    NotInitialized,

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),
}

/// An NLI or generative verifier model call failed.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("nli prediction failed: {0}")]
    NliFailed(String),

    #[error("verifier prediction failed: {0}")]
    VerifierFailed(String),

    #[error("malformed json: {0}")]
    MalformedJson(String),

    #[error("label mapping drift suspected: {0}")]
    LabelMappingDrift(String),
}

impl Error {
    /// Whether retrying the operation that produced this error might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Embed(EmbedError::Timeout)
                | Error::Embed(EmbedError::RequestFailed(_))
                | Error::Model(ModelError::NliFailed(_))
                | Error::Index(IndexError::SearchFailed(_))
        )
    }

    /// Coarse category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Parse(_) => "parse",
            Error::Chunk(_) => "chunk",
            Error::Embed(_) => "embed",
            Error::Index(_) => "index",
            Error::Store(_) => "store",
            Error::Model(_) => "model",
            Error::InconsistentState(_) => "inconsistent_state",
            Error::NotFound(_) => "not_found",
            Error::BadInput(_) => "bad_input",
            Error::Unsupported(_) => "unsupported",
            Error::TooLarge(_) => "too_large",
            Error::Conflict(_) => "conflict",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Http(_) => "http",
            Error::Database(_) => "database",
            Error::Generic(_) => "generic",
        }
    }

    /// HTTP status code this error maps to at the external boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadInput(_) => 400,
            Error::Unsupported(_) | Error::Parse(ParseError::UnsupportedExtension(_)) => 415,
            Error::TooLarge(_) => 413,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout = Error::Embed(EmbedError::Timeout);
        assert!(timeout.is_retryable());

        let bad_input = Error::BadInput("missing file".to_string());
        assert!(!bad_input.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let err = Error::Parse(ParseError::EmptyOutput);
        assert_eq!(err.category(), "parse");
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::TooLarge("x".into()).status_code(), 413);
        assert_eq!(Error::Unsupported("x".into()).status_code(), 415);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert_eq!(Error::Store(StoreError::NotInitialized).status_code(), 500);
    }
}
