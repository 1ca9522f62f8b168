//! Embedding provider trait for generating vector embeddings from text.
//!
//! [`HashingEmbedder`] is a deterministic, dependency-free provider suitable
//! for tests and offline corpora. Model-backed providers live behind the
//! `openai` and `ollama` features.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The same provider must be used at indexing and query time so
/// that chunk and query vectors share one metric space.
///
/// The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use corpus_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input. Override this method if the backend
    /// supports native batch embedding for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A short name used in logs and error messages.
    fn name(&self) -> &str {
        "embedder"
    }
}

/// A deterministic feature-hashing embedder.
///
/// Each lower-cased alphanumeric token contributes to one signed bucket, and
/// each of its character trigrams (with word-boundary markers) contributes at
/// half weight, so inflections like "breath" / "breathing" land near each
/// other. The result is L2-normalised.
///
/// Text with no alphanumeric tokens (including the empty string) embeds to
/// the all-zero vector rather than failing. Under
/// [`DistanceMetric::L2Squared`](crate::DistanceMetric::L2Squared) a zero
/// query sits at distance 1.0 from every stored chunk, so it ranks nothing
/// above anything else.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Dimensionality matching `all-MiniLM-L6-v2`, the model the service was first built around.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Create an embedder producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);

            let marked: Vec<char> =
                std::iter::once('<').chain(token.chars()).chain(std::iter::once('>')).collect();
            for trigram in marked.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.accumulate(&mut vector, trigram.as_bytes(), 0.5);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

/// 64-bit FNV-1a. Stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn embeddings_are_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Breathing helps anxiety.").await.unwrap();
        let b = embedder.embed("Breathing helps anxiety.").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm = dot(&a, &a).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("  ... ").await.unwrap();
        assert_eq!(v.len(), HashingEmbedder::DEFAULT_DIMENSIONS);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn related_text_is_closer_than_unrelated_text() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("breathing techniques").await.unwrap();
        let related = embedder.embed("Slow breathing helps anxiety").await.unwrap();
        let unrelated = embedder.embed("Quarterly revenue grew in Europe").await.unwrap();
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[tokio::test]
    async fn batch_matches_single_embeddings() {
        let embedder = HashingEmbedder::new(32);
        let batch = embedder.embed_batch(&["one", "two"]).await.unwrap();
        assert_eq!(batch[0], embedder.embed("one").await.unwrap());
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }
}
