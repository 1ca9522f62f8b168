//! Error types for the `corpus-rag` crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while indexing a corpus or serving queries.
///
/// Per-document ([`Extraction`](RagError::Extraction)) and per-chunk
/// ([`Embedding`](RagError::Embedding)) failures are absorbed by the
/// indexing pipeline. Everything else propagates to the caller of the
/// operation that produced it.
#[derive(Debug, Error)]
pub enum RagError {
    /// A document could not be read or parsed.
    #[error("Extraction error ({document}): {message}")]
    Extraction {
        /// The file name of the failing document.
        document: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector index could not be constructed from the given records.
    #[error("Index build error: {0}")]
    IndexBuild(String),

    /// A vector did not match the dimensionality of the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimensionality of the index.
        expected: usize,
        /// The dimensionality of the offending vector.
        actual: usize,
    },

    /// A persisted index was missing, corrupt, or of the wrong shape.
    #[error("Index load error ({}): {message}", path.display())]
    IndexLoad {
        /// The index directory that was read.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// A search was attempted before any index was built or loaded.
    #[error("Index not ready: no index has been built or loaded")]
    IndexNotReady,

    /// A whole-corpus indexing run failed.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// The query was rejected before reaching the index.
    #[error("Invalid query '{query}': {reason}")]
    InvalidQuery {
        /// The rejected query text.
        query: String,
        /// Why the query was rejected.
        reason: String,
    },

    /// The retrieval service has no active index.
    #[error("Retrieval service not ready (query '{query}')")]
    NotReady {
        /// The query that could not be served.
        query: String,
    },

    /// The query did not complete before its deadline.
    #[error("Query '{query}' timed out after {timeout:?}")]
    Timeout {
        /// The query that timed out.
        query: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error outside of index loading.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding failed while persisting an index.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether this error was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RagError::InvalidQuery { .. })
    }
}

/// A convenience result type for corpus-rag operations.
pub type Result<T> = std::result::Result<T, RagError>;
