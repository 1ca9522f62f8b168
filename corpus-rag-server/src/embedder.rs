use std::{str::FromStr, sync::Arc};

use anyhow::bail;
use corpus_rag::{EmbeddingProvider, HashingEmbedder};
use tracing::warn;

/// Which embedding backend the server runs with, from `RAG_EMBEDDER`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmbedderKind {
    #[default]
    Hashing,
    FastEmbed,
    OpenAi,
    Ollama,
}

impl FromStr for EmbedderKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hashing" | "" => Ok(Self::Hashing),
            "fastembed" | "minilm" => Ok(Self::FastEmbed),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => bail!(
                "unknown RAG_EMBEDDER `{other}` (expected hashing, fastembed, openai or ollama)"
            ),
        }
    }
}

impl EmbedderKind {
    pub fn from_env() -> anyhow::Result<Self> {
        std::env::var("RAG_EMBEDDER").map_or(Ok(Self::default()), |value| value.parse())
    }
}

/// Construct the embedding provider for `kind`.
///
/// Providers other than the hashing embedder are only available when the
/// server is built with the matching feature.
pub fn build_embedder(kind: EmbedderKind) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match kind {
        EmbedderKind::Hashing => {
            warn!(
                "using the feature-hashing embedder: rankings are lexical, not semantic; \
                 set RAG_EMBEDDER=fastembed for sentence embeddings"
            );
            Ok(Arc::new(HashingEmbedder::default()))
        }
        #[cfg(feature = "fastembed")]
        EmbedderKind::FastEmbed => {
            Ok(Arc::new(corpus_rag::fastembed::FastEmbedProvider::from_env()?))
        }
        #[cfg(feature = "openai")]
        EmbedderKind::OpenAi => {
            Ok(Arc::new(corpus_rag::openai::OpenAIEmbeddingProvider::from_env()?))
        }
        #[cfg(feature = "ollama")]
        EmbedderKind::Ollama => {
            Ok(Arc::new(corpus_rag::ollama::OllamaEmbeddingProvider::from_env()?))
        }
        #[allow(unreachable_patterns)]
        other => bail!("embedder {other:?} requires building with its cargo feature"),
    }
}
