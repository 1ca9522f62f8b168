//! In-process sentence embeddings via `fastembed` (ONNX Runtime).
//!
//! This module is only available when the `fastembed` feature is enabled.
//! The default model is `all-MiniLM-L6-v2`, downloaded on first use into the
//! `fastembed` cache directory.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "fastembed";

/// The dimensionality of `all-MiniLM-L6-v2`.
const MINILM_DIMENSIONS: usize = 384;

/// An [`EmbeddingProvider`] running `all-MiniLM-L6-v2` locally.
///
/// Inference is CPU-bound and runs on the blocking thread pool.
#[derive(Clone)]
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedProvider {
    /// Load `all-MiniLM-L6-v2`, using `cache_dir` for the model files when given.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] if the model cannot be downloaded or loaded.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let mut options =
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(options).map_err(|e| embedding_error("load", e))?;
        info!(provider = PROVIDER, model = "all-MiniLM-L6-v2", "embedding model loaded");
        Ok(Self { model: Arc::new(Mutex::new(model)) })
    }

    /// Load the model, taking the cache directory from `FASTEMBED_CACHE_DIR`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_env() -> Result<Self> {
        Self::new(std::env::var_os("FASTEMBED_CACHE_DIR").map(PathBuf::from))
    }
}

fn embedding_error(stage: &str, error: impl std::fmt::Display) -> RagError {
    RagError::Embedding {
        provider: PROVIDER.to_string(),
        message: format!("{stage} failed: {error}"),
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| embedding_error("embed", "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), "embedding batch");

        let model = Arc::clone(&self.model);
        let inputs: Vec<String> = texts.iter().map(|text| (*text).to_string()).collect();
        let vectors = tokio::task::spawn_blocking(move || {
            let model =
                model.lock().map_err(|_| embedding_error("embed", "model lock poisoned"))?;
            model.embed(inputs, None).map_err(|e| embedding_error("embed", e))
        })
        .await
        .map_err(|e| embedding_error("embed", e))??;

        if vectors.len() != texts.len() {
            return Err(embedding_error(
                "embed",
                format!("model returned {} embeddings for {} inputs", vectors.len(), texts.len()),
            ));
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        MINILM_DIMENSIONS
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_the_provider() {
        let err = embedding_error("load", "no network");
        let RagError::Embedding { provider, message } = &err else {
            panic!("expected an embedding error, got {err:?}");
        };
        assert_eq!(provider, "fastembed");
        assert_eq!(message, "load failed: no network");
    }
}
