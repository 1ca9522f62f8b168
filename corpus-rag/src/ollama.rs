//! Ollama embedding provider for locally hosted models.
//!
//! This module is only available when the `ollama` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// The default Ollama server address.
const DEFAULT_URL: &str = "http://localhost:11434";

/// The default embedding model: the MiniLM sentence-transformer packaged for Ollama.
const DEFAULT_MODEL: &str = "all-minilm";

/// The dimensionality of `all-minilm`.
const DEFAULT_DIMENSIONS: usize = 384;

/// An [`EmbeddingProvider`] backed by a local Ollama server's `/api/embed` endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use corpus_rag::ollama::OllamaEmbeddingProvider;
///
/// let provider = OllamaEmbeddingProvider::new()?
///     .with_model("nomic-embed-text", 768);
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbeddingProvider {
    /// Create a provider for `all-minilm` on `localhost:11434`.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| RagError::Embedding {
                provider: "Ollama".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: DEFAULT_URL.into(),
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Create a provider from `OLLAMA_URL` and `OLLAMA_EMBEDDING_MODEL` /
    /// `OLLAMA_EMBEDDING_DIMENSIONS`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let mut provider = Self::new()?;
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            provider = provider.with_base_url(url);
        }
        if let Ok(model) = std::env::var("OLLAMA_EMBEDDING_MODEL") {
            let dimensions = match std::env::var("OLLAMA_EMBEDDING_DIMENSIONS") {
                Ok(raw) => raw.parse().map_err(|e| {
                    RagError::Config(format!("invalid OLLAMA_EMBEDDING_DIMENSIONS '{raw}': {e}"))
                })?,
                Err(_) => provider.dimensions,
            };
            provider = provider.with_model(model, dimensions);
        }
        Ok(provider)
    }

    /// Set the server address.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model name and the dimensionality it produces.
    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::Embedding {
            provider: "Ollama".into(),
            message: "server returned no embedding".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = "Ollama",
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| {
                error!(provider = "Ollama", error = %e, "request failed");
                RagError::Embedding {
                    provider: "Ollama".into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(provider = "Ollama", %status, "API error");
            return Err(RagError::Embedding {
                provider: "Ollama".into(),
                message: format!("server returned {status}: {body}"),
            });
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| RagError::Embedding {
            provider: "Ollama".into(),
            message: format!("failed to parse response: {e}"),
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RagError::Embedding {
                provider: "Ollama".into(),
                message: format!(
                    "server returned {} embeddings for {} inputs",
                    parsed.embeddings.len(),
                    texts.len()
                ),
            });
        }
        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
