//! Request and response shapes for the service's external operations.
//!
//! These types carry the wire contract (`search`, `health`, `reindex`)
//! independently of any transport; the HTTP server serializes them as-is.
//!
//! # Example
//!
//! ```rust,ignore
//! use corpus_rag::api::{self, SearchRequest};
//!
//! let request: SearchRequest = serde_json::from_str(r#"{"query": "anxiety", "top_k": 3}"#)?;
//! let response = api::search(&service, request).await?;
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::document::{PageNumber, QueryResult};
use crate::error::{RagError, Result};
use crate::service::RetrievalService;

/// The service name reported by [`health`].
pub const SERVICE_NAME: &str = "rag-retrieval-service";

/// Upper bound of the [`chunk_id`] range.
pub const CHUNK_ID_SPACE: u64 = 10_000;

/// Input of the search operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    /// The natural-language query. Required and non-empty.
    #[serde(default)]
    pub query: String,
    /// Maximum number of chunks to return; must be at least 1. When absent
    /// the service's configured `top_k` (5 by default) applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
}

impl SearchRequest {
    /// Create a request for `query` with the configured `top_k`.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), top_k: None }
    }

    /// Set `top_k`.
    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// One chunk in a search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    /// The chunk text.
    pub text: String,
    /// The file name of the source document.
    pub source: String,
    /// Weak identifier derived from the text; see [`chunk_id`].
    pub chunk_id: u64,
    /// The page the chunk starts on, or `null` when unknown.
    pub page: PageNumber,
    /// Distance to the query (lower is more relevant).
    pub score: f32,
}

impl From<QueryResult> for ChunkPayload {
    fn from(result: QueryResult) -> Self {
        Self {
            chunk_id: chunk_id(&result.text),
            text: result.text,
            source: result.source_document,
            page: result.page,
            score: result.score,
        }
    }
}

/// Output of the search operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    /// Matching chunks, most relevant first.
    pub chunks: Vec<ChunkPayload>,
}

/// Output of the health operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `"healthy"`: the process is up and answering.
    pub status: String,
    /// The service name.
    pub service: String,
    /// Whether an index is active and queries can be served.
    pub indexed: bool,
}

/// Output of the reindex operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReindexResponse {
    /// Always `"reindexed"` on success.
    pub status: String,
}

/// Derive the `chunk_id` for a chunk's text.
///
/// The id is the first eight bytes of the text's SHA-256 digest, read as a
/// big-endian integer, modulo 10 000. It is stable across processes but not
/// unique: distinct texts can collide, and clients must not treat it as a key.
pub fn chunk_id(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % CHUNK_ID_SPACE
}

/// Run a search request against `service`.
///
/// A request without `top_k` uses the service's configured `top_k`.
///
/// # Errors
///
/// Returns [`RagError::InvalidQuery`] if the query is empty or `top_k < 1`,
/// plus any error from [`RetrievalService::retrieve`].
pub async fn search(service: &RetrievalService, request: SearchRequest) -> Result<SearchResponse> {
    info!(query = %request.query, top_k = ?request.top_k, "search request");
    let top_k = match request.top_k {
        None => service.config().top_k,
        Some(k) if k < 1 => {
            return Err(RagError::InvalidQuery {
                query: request.query,
                reason: format!("top_k must be at least 1 (got {k})"),
            });
        }
        Some(k) => usize::try_from(k).unwrap_or(usize::MAX),
    };

    let results = service.retrieve(&request.query, top_k).await?;
    let chunks: Vec<ChunkPayload> = results.into_iter().map(ChunkPayload::from).collect();
    info!(result_count = chunks.len(), "search response");
    Ok(SearchResponse { chunks })
}

/// Report whether `service` is serving queries.
pub async fn health(service: &RetrievalService) -> HealthResponse {
    HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        indexed: service.is_ready().await,
    }
}

/// Rebuild the index behind `service`.
///
/// # Errors
///
/// Returns the error from [`RetrievalService::rebuild`]; the previous index
/// keeps serving in that case.
pub async fn reindex(service: &RetrievalService) -> Result<ReindexResponse> {
    let report = service.rebuild().await?;
    info!(generation = %report.generation, chunks = report.chunks_indexed, "reindex complete");
    Ok(ReindexResponse { status: "reindexed".to_string() })
}
