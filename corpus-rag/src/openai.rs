//! Embeddings from the OpenAI API or any endpoint that speaks its
//! `/v1/embeddings` protocol.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "openai";

const DEFAULT_URL: &str = "https://api.openai.com/v1/embeddings";

/// `text-embedding-3-small` at its native 1536 dimensions.
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;

/// The API rejects requests with more inputs than this.
const MAX_BATCH_INPUTS: usize = 2048;

/// An [`EmbeddingProvider`] calling an OpenAI-compatible embeddings endpoint.
///
/// ```rust,ignore
/// use corpus_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?.with_dimensions(384);
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    /// Sent as `dimensions` so the API truncates its output to match.
    truncate_to: Option<usize>,
}

fn embedding_error(message: impl Into<String>) -> RagError {
    RagError::Embedding { provider: PROVIDER.to_string(), message: message.into() }
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for `text-embedding-3-small` with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] if `api_key` is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(embedding_error("API key must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| embedding_error(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: DEFAULT_URL.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            truncate_to: None,
        })
    }

    /// Create a provider from `OPENAI_API_KEY`, with optional
    /// `OPENAI_EMBEDDINGS_URL`, `OPENAI_EMBEDDING_MODEL` and
    /// `OPENAI_EMBEDDING_DIMENSIONS` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] if the key is missing, or
    /// [`RagError::Config`] if the dimensions override is not a number.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| embedding_error("OPENAI_API_KEY is not set"))?;
        let mut provider = Self::new(api_key)?;
        if let Ok(url) = std::env::var("OPENAI_EMBEDDINGS_URL") {
            provider = provider.with_base_url(url);
        }
        if let Ok(model) = std::env::var("OPENAI_EMBEDDING_MODEL") {
            provider = provider.with_model(model);
        }
        if let Ok(raw) = std::env::var("OPENAI_EMBEDDING_DIMENSIONS") {
            let dimensions = raw.parse().map_err(|e| {
                RagError::Config(format!("invalid OPENAI_EMBEDDING_DIMENSIONS '{raw}': {e}"))
            })?;
            provider = provider.with_dimensions(dimensions);
        }
        Ok(provider)
    }

    /// Set the full embeddings URL, for gateways and compatible servers.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the model name. Dimensions are left unchanged.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the API to truncate embeddings to `dimensions`.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.truncate_to = Some(dimensions);
        self
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let body =
            EmbedRequest { model: &self.model, input: texts, dimensions: self.truncate_to };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                embedding_error(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            error!(provider = PROVIDER, %status, "API error");
            return Err(embedding_error(format!("API returned {status}: {detail}")));
        }

        let mut parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| embedding_error(format!("failed to parse response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(embedding_error(format!(
                "API returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| embedding_error("API returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_INPUTS) {
            results.extend(self.request(batch).await?);
        }
        Ok(results)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
