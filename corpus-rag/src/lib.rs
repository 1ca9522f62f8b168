//! Semantic passage retrieval over a fixed corpus of PDF documents.
//!
//! `corpus-rag` indexes a directory of documents and answers
//! natural-language queries with the most relevant text chunks, their
//! provenance (document and page), and a distance score.
//!
//! The moving parts, leaves first:
//!
//! - [`Extractor`]: file → pages of text ([`PdfExtractor`], [`TextExtractor`])
//! - [`Chunker`]: pages → overlapping chunks ([`RecursiveCharacterChunker`])
//! - [`EmbeddingProvider`]: text → vector ([`HashingEmbedder`], plus
//!   `fastembed` / `openai` / `ollama` providers behind features)
//! - [`VectorIndex`]: exact nearest-neighbour search with atomic persistence
//! - [`IndexingPipeline`]: extract → chunk → embed → build → persist
//! - [`RetrievalService`]: owns the active index, serves queries, and swaps
//!   generations on rebuild
//!
//! Scores are distances under the index's [`DistanceMetric`]: lower is
//! more relevant.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use corpus_rag::{HashingEmbedder, IndexingPipeline, PdfExtractor, RagConfig, RetrievalService};
//!
//! let pipeline = IndexingPipeline::builder()
//!     .config(RagConfig::from_env()?)
//!     .extractor(Arc::new(PdfExtractor::new()))
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .build()?;
//!
//! let service = RetrievalService::new(pipeline);
//! service.initialize().await?;
//! for hit in service.retrieve("breathing techniques for anxiety", 3).await? {
//!     println!("{} (page {}) {:.4}", hit.source_document, hit.page, hit.score);
//! }
//! ```

pub mod api;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod index;
pub mod pipeline;
pub mod service;

#[cfg(feature = "fastembed")]
pub mod fastembed;
#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, RecursiveCharacterChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, Document, Page, PageNumber, QueryResult, ScoredRecord, VectorRecord};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{RagError, Result};
#[cfg(feature = "pdf")]
pub use extractor::PdfExtractor;
pub use extractor::{Extractor, TextExtractor};
pub use index::{DistanceMetric, IndexHandle, VectorIndex};
pub use pipeline::{IndexingPipeline, IndexingPipelineBuilder, IndexingReport, discover_documents};
pub use service::{RebuildHandle, RetrievalService, ServiceState};
