//! Whole-corpus indexing pipeline.
//!
//! The [`IndexingPipeline`] coordinates a full indexing run by composing an
//! [`Extractor`], a [`Chunker`], and an [`EmbeddingProvider`]:
//!
//! 1. discover document files in the corpus directory
//! 2. extract each document (failures are logged and skipped)
//! 3. chunk every document
//! 4. embed every chunk (failed chunks are logged and skipped)
//! 5. build a [`VectorIndex`] and persist it to the index directory
//!
//! # Example
//!
//! ```rust,ignore
//! use corpus_rag::{
//!     HashingEmbedder, IndexingPipeline, PdfExtractor, RagConfig, RecursiveCharacterChunker,
//! };
//!
//! let pipeline = IndexingPipeline::builder()
//!     .config(RagConfig::default())
//!     .extractor(Arc::new(PdfExtractor::new()))
//!     .chunker(Arc::new(RecursiveCharacterChunker::new(1000, 200)))
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .build()?;
//!
//! let (index, report) = pipeline.run("./pdfs").await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunking::{Chunker, RecursiveCharacterChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document, VectorRecord};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::{Extractor, document_name};
use crate::index::VectorIndex;

/// Counters describing one indexing run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IndexingReport {
    /// The generation of the index that was built.
    pub generation: Uuid,
    /// Documents that contributed at least one chunk.
    pub documents_indexed: usize,
    /// Documents skipped because extraction failed or produced no text.
    pub documents_failed: usize,
    /// Chunks stored in the index.
    pub chunks_indexed: usize,
    /// Chunks dropped because they could not be embedded.
    pub chunks_skipped: usize,
}

/// The whole-corpus indexing orchestrator. Construct one via
/// [`IndexingPipeline::builder()`].
pub struct IndexingPipeline {
    config: RagConfig,
    extractor: Arc<dyn Extractor>,
    chunker: Arc<dyn Chunker>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

impl IndexingPipeline {
    /// Create a new [`IndexingPipelineBuilder`].
    pub fn builder() -> IndexingPipelineBuilder {
        IndexingPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Index every document in `corpus_dir` and persist the result to the
    /// configured index directory.
    ///
    /// The persisted index is only replaced once the new one is fully built,
    /// so dropping this future before it completes leaves the previous index
    /// intact.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build) and [`persist`](Self::persist).
    pub async fn run(&self, corpus_dir: impl AsRef<Path>) -> Result<(VectorIndex, IndexingReport)> {
        let (index, report) = self.build(corpus_dir).await?;
        self.persist(&index).await?;
        Ok((index, report))
    }

    /// Index every document in `corpus_dir` in memory, without touching the
    /// index directory.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Pipeline`] if the corpus yields no usable
    /// documents, if no chunk could be embedded, or if the index cannot be
    /// built.
    pub async fn build(
        &self,
        corpus_dir: impl AsRef<Path>,
    ) -> Result<(VectorIndex, IndexingReport)> {
        let corpus_dir = corpus_dir.as_ref();
        info!(corpus = %corpus_dir.display(), "starting indexing run");

        let paths = discover_documents(corpus_dir, self.extractor.as_ref())?;
        info!(documents = paths.len(), "found document files");

        let mut documents_indexed = 0;
        let mut documents_failed = 0;
        let mut chunks = Vec::new();

        for path in paths {
            let document = match self.extract(path).await {
                Ok(document) => document,
                Err(e) => {
                    error!(error = %e, "skipping document");
                    documents_failed += 1;
                    continue;
                }
            };

            let mut document_chunks = self.chunker.chunk(&document);
            if document_chunks.is_empty() {
                warn!(document = %document.name, "document produced no text, skipping");
                documents_failed += 1;
                continue;
            }

            info!(
                document = %document.name,
                pages = document.pages.len(),
                chunk_count = document_chunks.len(),
                "loaded document"
            );
            if let Some(doc_type) = &self.config.document_type {
                for chunk in &mut document_chunks {
                    chunk.doc_type = Some(doc_type.clone());
                }
            }
            documents_indexed += 1;
            chunks.extend(document_chunks);
        }

        if documents_indexed == 0 {
            error!(corpus = %corpus_dir.display(), documents_failed, "no usable documents");
            return Err(RagError::Pipeline(format!(
                "no documents: '{}' yielded no usable documents ({documents_failed} failed)",
                corpus_dir.display()
            )));
        }
        info!(documents_indexed, chunk_count = chunks.len(), "split documents into chunks");

        let total_chunks = chunks.len();
        let records = self.embed_chunks(chunks).await;
        let chunks_skipped = total_chunks - records.len();
        if records.is_empty() {
            return Err(RagError::Pipeline(format!(
                "embedding failed for all {total_chunks} chunks"
            )));
        }

        let index = VectorIndex::build(records, self.config.metric).map_err(|e| {
            error!(error = %e, "index build failed");
            RagError::Pipeline(format!("index build failed: {e}"))
        })?;

        let report = IndexingReport {
            generation: index.generation(),
            documents_indexed,
            documents_failed,
            chunks_indexed: index.len(),
            chunks_skipped,
        };
        info!(?report, "indexing run complete");
        Ok((index, report))
    }

    /// Write `index` to the configured index directory, replacing any
    /// previous generation atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Pipeline`] if the index cannot be written.
    pub async fn persist(&self, index: &VectorIndex) -> Result<()> {
        persist_to(index, &self.config.index_dir).await
    }

    /// Extract one document on a blocking thread.
    async fn extract(&self, path: PathBuf) -> Result<Document> {
        let extractor = Arc::clone(&self.extractor);
        let name = document_name(&path);
        debug!(document = %name, "extracting");
        tokio::task::spawn_blocking(move || extractor.extract(&path)).await.map_err(|e| {
            RagError::Extraction { document: name, message: format!("extraction task failed: {e}") }
        })?
    }

    /// Embed chunks in batches. A failed batch is retried one chunk at a
    /// time; chunks that still fail, or come back with the wrong
    /// dimensionality, are dropped.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Vec<VectorRecord> {
        let dimensions = self.embedding_provider.dimensions();
        let provider = self.embedding_provider.name();
        let mut records = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = match self.embedding_provider.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    vectors.into_iter().map(Ok).collect::<Vec<Result<Vec<f32>>>>()
                }
                Ok(vectors) => {
                    warn!(
                        provider,
                        expected = batch.len(),
                        actual = vectors.len(),
                        "batch size mismatch, retrying per chunk"
                    );
                    self.embed_individually(&texts).await
                }
                Err(e) => {
                    warn!(provider, error = %e, "batch embedding failed, retrying per chunk");
                    self.embed_individually(&texts).await
                }
            };

            for (chunk, vector) in batch.iter().zip(vectors) {
                match vector {
                    Ok(vector) if vector.len() == dimensions => {
                        records.push(VectorRecord { chunk: chunk.clone(), vector });
                    }
                    Ok(vector) => {
                        warn!(
                            document = %chunk.source_document,
                            chunk_index = chunk.chunk_index,
                            expected = dimensions,
                            actual = vector.len(),
                            "skipping chunk with wrong embedding dimensionality"
                        );
                    }
                    Err(e) => {
                        warn!(
                            document = %chunk.source_document,
                            chunk_index = chunk.chunk_index,
                            error = %e,
                            "skipping chunk that failed to embed"
                        );
                    }
                }
            }
        }

        records
    }

    async fn embed_individually(&self, texts: &[&str]) -> Vec<Result<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embedding_provider.embed(text).await);
        }
        results
    }
}

pub(crate) async fn persist_to(index: &VectorIndex, index_dir: &Path) -> Result<()> {
    index.persist(index_dir).await.map_err(|e| {
        error!(index_dir = %index_dir.display(), error = %e, "persist failed");
        RagError::Pipeline(format!("failed to persist index to '{}': {e}", index_dir.display()))
    })
}

/// List the files directly inside `corpus_dir` that `extractor` accepts, sorted by path.
///
/// # Errors
///
/// Returns [`RagError::Pipeline`] if `corpus_dir` is not a directory.
pub fn discover_documents(corpus_dir: &Path, extractor: &dyn Extractor) -> Result<Vec<PathBuf>> {
    if !corpus_dir.is_dir() {
        return Err(RagError::Pipeline(format!(
            "no documents: corpus directory '{}' does not exist",
            corpus_dir.display()
        )));
    }

    let mut files = WalkDir::new(corpus_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    path = ?e.path().map(Path::display),
                    error = %e,
                    "skipping unreadable corpus entry"
                );
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| extractor.accepts(entry.path()))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    files.sort();
    Ok(files)
}

/// Builder for constructing an [`IndexingPipeline`].
///
/// `extractor` and `embedding_provider` are required. The chunker defaults to
/// a [`RecursiveCharacterChunker`] sized from the config, and the config
/// defaults to [`RagConfig::default()`].
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = IndexingPipeline::builder()
///     .config(config)
///     .extractor(Arc::new(PdfExtractor::new()))
///     .embedding_provider(Arc::new(embedder))
///     .build()?;
/// ```
#[derive(Default)]
pub struct IndexingPipelineBuilder {
    config: Option<RagConfig>,
    extractor: Option<Arc<dyn Extractor>>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl IndexingPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document extractor.
    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Build the [`IndexingPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a required field is missing.
    pub fn build(self) -> Result<IndexingPipeline> {
        let config = self.config.unwrap_or_default();
        let extractor =
            self.extractor.ok_or_else(|| RagError::Config("extractor is required".to_string()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(RecursiveCharacterChunker::new(config.chunk_size, config.chunk_overlap))
        });

        Ok(IndexingPipeline { config, extractor, chunker, embedding_provider })
    }
}
