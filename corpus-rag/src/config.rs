//! Configuration for indexing and retrieval.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::index::DistanceMetric;

/// Configuration parameters for the indexing pipeline and retrieval service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Directory scanned for source documents.
    pub corpus_dir: PathBuf,
    /// Directory the serialized index is written to and loaded from.
    pub index_dir: PathBuf,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of results returned when the caller does not ask for a specific count.
    pub top_k: usize,
    /// Number of chunk texts sent to the embedder per call.
    pub embed_batch_size: usize,
    /// Deadline applied to each query.
    #[serde(with = "duration_millis")]
    pub query_timeout: Duration,
    /// Distance function used by the vector index.
    pub metric: DistanceMetric,
    /// Classification tag recorded on every chunk.
    pub document_type: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("./corpus"),
            index_dir: PathBuf::from("./faiss_index"),
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            embed_batch_size: 32,
            query_timeout: Duration::from_secs(30),
            metric: DistanceMetric::default(),
            document_type: None,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Build a config from `RAG_*` environment variables, falling back to defaults.
    ///
    /// Recognised variables: `RAG_CORPUS_DIR`, `RAG_INDEX_DIR`, `RAG_CHUNK_SIZE`,
    /// `RAG_CHUNK_OVERLAP`, `RAG_TOP_K`, `RAG_EMBED_BATCH_SIZE`,
    /// `RAG_QUERY_TIMEOUT_MS`, `RAG_DISTANCE_METRIC`, `RAG_DOCUMENT_TYPE`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a variable is set but unparseable, or if
    /// the resulting config fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Used by [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(dir) = lookup("RAG_CORPUS_DIR") {
            builder = builder.corpus_dir(dir);
        }
        if let Some(dir) = lookup("RAG_INDEX_DIR") {
            builder = builder.index_dir(dir);
        }
        if let Some(size) = parse_var(&lookup, "RAG_CHUNK_SIZE")? {
            builder = builder.chunk_size(size);
        }
        if let Some(overlap) = parse_var(&lookup, "RAG_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(overlap);
        }
        if let Some(k) = parse_var(&lookup, "RAG_TOP_K")? {
            builder = builder.top_k(k);
        }
        if let Some(batch) = parse_var(&lookup, "RAG_EMBED_BATCH_SIZE")? {
            builder = builder.embed_batch_size(batch);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "RAG_QUERY_TIMEOUT_MS")? {
            builder = builder.query_timeout(Duration::from_millis(ms));
        }
        if let Some(metric) = parse_var(&lookup, "RAG_DISTANCE_METRIC")? {
            builder = builder.metric(metric);
        }
        if let Some(doc_type) = lookup("RAG_DOCUMENT_TYPE") {
            builder = builder.document_type(doc_type);
        }
        builder.build()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RagError::Config(format!("invalid value '{raw}' for {key}: {e}"))),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the directory scanned for documents.
    pub fn corpus_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.corpus_dir = dir.into();
        self
    }

    /// Set the directory holding the persisted index.
    pub fn index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.index_dir = dir.into();
        self
    }

    /// Set the target chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of results per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the number of texts per embedding call.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the per-query deadline.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    /// Set the index distance metric.
    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Set the classification tag recorded on every chunk.
    pub fn document_type(mut self, doc_type: impl Into<String>) -> Self {
        self.config.document_type = Some(doc_type.into());
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embed_batch_size == 0`
    /// - `query_timeout` is zero
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if config.embed_batch_size == 0 {
            return Err(RagError::Config("embed_batch_size must be greater than zero".to_string()));
        }
        if config.query_timeout.is_zero() {
            return Err(RagError::Config("query_timeout must be greater than zero".to_string()));
        }
        Ok(config)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
