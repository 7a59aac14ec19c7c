//! ragkeeper: document ingestion and conflict-detection pipeline for a
//! retrieval-augmented knowledge base.
//!
//! A raw artifact (text, markdown, PDF, spreadsheet, or URL) is parsed into
//! normalized text, split into token-bounded chunks, embedded into a vector
//! space, and checked against the existing corpus for duplicate or
//! contradictory content before it is allowed to become retrievable.
//!
//! # Example
//!
//! ```rust,no_run
//! use ragkeeper::config::Config;
//!
//! let config = Config::default();
//! config.validate().unwrap();
//! ```

pub mod api;
pub mod chunker;
pub mod config;
pub mod conflict_engine;
pub mod embedding;
pub mod error;
pub mod model;
pub mod nli;
pub mod object_store;
pub mod parser;
pub mod publish;
pub mod resolution;
pub mod store;
pub mod verifier;
pub mod vector_store;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Chunk, Conflict, ConflictLabel, Document, DocumentStatus, JudgedBy, ResolutionAction};

/// Crate version, exposed for diagnostics and the `/healthz` endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
