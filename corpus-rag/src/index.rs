//! Exact nearest-neighbour vector index with JSON persistence.
//!
//! A [`VectorIndex`] is immutable once built: it is either constructed from
//! a complete set of [`VectorRecord`]s or loaded from a directory written by
//! [`VectorIndex::persist`]. Search is brute force over every record and is
//! deterministic: equal distances are ordered by record position.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::document::{ScoredRecord, VectorRecord};
use crate::error::{RagError, Result};

/// File name of the serialized index inside the index directory.
pub const INDEX_FILE_NAME: &str = "index.json";

const FORMAT_TAG: &str = "corpus-rag-index";
const FORMAT_VERSION: u32 = 1;

/// The distance function used to rank records. Scores are always distances:
/// a smaller score means a more relevant record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance, as reported by a flat L2 index.
    #[default]
    L2Squared,
    /// Cosine distance: `1 - cosine_similarity`, in `[0, 2]`.
    Cosine,
}

impl DistanceMetric {
    /// Distance between two vectors of equal length.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2Squared => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::L2Squared => f.write_str("l2_squared"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "l2_squared" | "euclidean" => Ok(DistanceMetric::L2Squared),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric '{other}'")),
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// An immutable, searchable collection of vector records for one corpus generation.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    generation: Uuid,
    created_at: DateTime<Utc>,
    metric: DistanceMetric,
    dimensions: usize,
    records: Vec<VectorRecord>,
}

/// On-disk layout of `index.json`.
#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    format: &'a str,
    version: u32,
    generation: Uuid,
    created_at: DateTime<Utc>,
    metric: DistanceMetric,
    dimensions: usize,
    records: &'a [VectorRecord],
}

#[derive(Deserialize)]
struct PersistedIndex {
    format: String,
    version: u32,
    generation: Uuid,
    created_at: DateTime<Utc>,
    metric: DistanceMetric,
    dimensions: usize,
    records: Vec<VectorRecord>,
}

impl VectorIndex {
    /// Build a fresh index from `records`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexBuild`] if `records` is empty, if the vectors
    /// have zero length, or if they disagree on dimensionality.
    pub fn build(records: Vec<VectorRecord>, metric: DistanceMetric) -> Result<Self> {
        let dimensions = validate_records(&records).map_err(RagError::IndexBuild)?;
        let index = Self {
            generation: Uuid::new_v4(),
            created_at: Utc::now(),
            metric,
            dimensions,
            records,
        };
        info!(
            generation = %index.generation,
            records = index.records.len(),
            dimensions,
            %metric,
            "built vector index"
        );
        Ok(index)
    }

    /// The generation identifier assigned when this index was built.
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    /// When this index was built.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The distance metric used for search.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// The dimensionality of every stored vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false for a successfully built or loaded index.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The stored records in index order.
    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    /// Return up to `k` records nearest to `query`, ordered by ascending distance.
    ///
    /// Returns every record when the index holds fewer than `k`. Equal
    /// distances keep index order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if `query` has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        if query.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (position, self.metric.distance(&record.vector, query)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredRecord { record: self.records[position].clone(), score })
            .collect())
    }

    /// Write the index to `dir/index.json`, replacing any previous index atomically.
    ///
    /// The index is written to a temporary file in the same directory and then
    /// renamed over the final path, so a crash never leaves a partial index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] or [`RagError::Serialization`] on failure.
    pub async fn persist(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let final_path = dir.join(INDEX_FILE_NAME);
        let temp_path = dir.join(format!("{INDEX_FILE_NAME}.{}.tmp", self.generation));

        let data = serde_json::to_vec(&PersistedIndexRef {
            format: FORMAT_TAG,
            version: FORMAT_VERSION,
            generation: self.generation,
            created_at: self.created_at,
            metric: self.metric,
            dimensions: self.dimensions,
            records: &self.records,
        })?;

        tokio::fs::write(&temp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(
            generation = %self.generation,
            path = %final_path.display(),
            "persisted vector index"
        );
        Ok(())
    }

    /// Load an index previously written by [`persist`](Self::persist).
    ///
    /// When `expected_dimensions` is given, an index of any other
    /// dimensionality is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexLoad`] if the directory holds no index, the
    /// file is not a valid index of this format, or its dimensionality is wrong.
    pub async fn load(dir: impl AsRef<Path>, expected_dimensions: Option<usize>) -> Result<Self> {
        let dir = dir.as_ref();
        let load_error = |message: String| RagError::IndexLoad { path: dir.to_path_buf(), message };

        let path = dir.join(INDEX_FILE_NAME);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| load_error(format!("cannot read {}: {e}", path.display())))?;

        let persisted: PersistedIndex = serde_json::from_slice(&data)
            .map_err(|e| load_error(format!("malformed index file: {e}")))?;

        if persisted.format != FORMAT_TAG || persisted.version != FORMAT_VERSION {
            return Err(load_error(format!(
                "unsupported index format '{}' version {}",
                persisted.format, persisted.version
            )));
        }

        let dimensions = validate_records(&persisted.records).map_err(load_error)?;
        if dimensions != persisted.dimensions {
            return Err(load_error(format!(
                "header declares {} dimensions but records have {dimensions}",
                persisted.dimensions
            )));
        }
        if let Some(expected) = expected_dimensions.filter(|expected| *expected != dimensions) {
            return Err(load_error(format!(
                "index has {dimensions} dimensions, embedder produces {expected}"
            )));
        }

        let index = Self {
            generation: persisted.generation,
            created_at: persisted.created_at,
            metric: persisted.metric,
            dimensions,
            records: persisted.records,
        };

        info!(
            generation = %index.generation,
            records = index.records.len(),
            path = %path.display(),
            "loaded vector index"
        );
        Ok(index)
    }

    /// Whether `dir` contains an index file. Does not validate it.
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(INDEX_FILE_NAME).is_file()
    }

    /// The path of the index file inside `dir`.
    pub fn file_path(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(INDEX_FILE_NAME)
    }
}

/// Check that records are non-empty and share one non-zero dimensionality.
fn validate_records(records: &[VectorRecord]) -> std::result::Result<usize, String> {
    let first = records.first().ok_or_else(|| "no records to index".to_string())?;
    let dimensions = first.vector.len();
    if dimensions == 0 {
        return Err("vectors must have at least one dimension".to_string());
    }
    if let Some((position, record)) =
        records.iter().enumerate().find(|(_, r)| r.vector.len() != dimensions)
    {
        return Err(format!(
            "record {position} has {} dimensions, expected {dimensions}",
            record.vector.len()
        ));
    }
    Ok(dimensions)
}

/// A slot holding the currently searchable index, if any.
///
/// Searching an empty slot fails with [`RagError::IndexNotReady`].
#[derive(Debug, Clone, Default)]
pub struct IndexHandle {
    index: Option<Arc<VectorIndex>>,
}

impl IndexHandle {
    /// An empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held index.
    pub fn set(&mut self, index: Arc<VectorIndex>) {
        self.index = Some(index);
    }

    /// The held index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexNotReady`] if no index has been set.
    pub fn get(&self) -> Result<Arc<VectorIndex>> {
        self.index.clone().ok_or(RagError::IndexNotReady)
    }

    /// Search the held index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexNotReady`] if no index has been set.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        self.index.as_ref().ok_or(RagError::IndexNotReady)?.search(query, k)
    }

    /// Whether an index is held.
    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, PageNumber};

    fn record(text: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk: Chunk {
                text: text.to_string(),
                source_document: "doc.pdf".to_string(),
                page: PageNumber::Known(1),
                chunk_index: 0,
                doc_type: None,
            },
            vector,
        }
    }

    #[test]
    fn build_rejects_empty_records() {
        let err = VectorIndex::build(Vec::new(), DistanceMetric::L2Squared).unwrap_err();
        assert!(matches!(err, RagError::IndexBuild(_)));
    }

    #[test]
    fn build_rejects_mixed_dimensions() {
        let records = vec![record("a", vec![1.0, 0.0]), record("b", vec![1.0])];
        let err = VectorIndex::build(records, DistanceMetric::L2Squared).unwrap_err();
        assert!(matches!(err, RagError::IndexBuild(msg) if msg.contains("record 1")));
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let records = vec![
            record("far", vec![0.0, 1.0]),
            record("near", vec![1.0, 0.1]),
            record("exact", vec![1.0, 0.0]),
        ];
        let index = VectorIndex::build(records, DistanceMetric::L2Squared).unwrap();
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.record.chunk.text.as_str()).collect();
        assert_eq!(texts, ["exact", "near"]);
        assert_eq!(results[0].score, 0.0);
        assert!((results[1].score - 0.01).abs() < 1e-6);
    }

    #[test]
    fn search_with_large_k_returns_every_record() {
        let records = (0..3).map(|i| record(&i.to_string(), vec![i as f32, 1.0])).collect();
        let index = VectorIndex::build(records, DistanceMetric::Cosine).unwrap();
        assert_eq!(index.search(&[1.0, 1.0], 100).unwrap().len(), 3);
        assert!(index.search(&[1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_index_order() {
        let records = vec![record("first", vec![1.0, 0.0]), record("second", vec![1.0, 0.0])];
        let index = VectorIndex::build(records, DistanceMetric::L2Squared).unwrap();
        for _ in 0..5 {
            let results = index.search(&[0.0, 1.0], 2).unwrap();
            assert_eq!(results[0].record.chunk.text, "first");
            assert_eq!(results[1].record.chunk.text, "second");
        }
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let index =
            VectorIndex::build(vec![record("a", vec![1.0, 0.0])], DistanceMetric::L2Squared)
                .unwrap();
        let err = index.search(&[1.0], 1).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn cosine_distance_of_zero_vector_is_one() {
        assert_eq!(DistanceMetric::Cosine.distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!("euclidean".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2Squared);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn empty_handle_is_not_ready() {
        let handle = IndexHandle::new();
        assert!(!handle.is_ready());
        assert!(matches!(handle.search(&[1.0], 1), Err(RagError::IndexNotReady)));
        assert!(matches!(handle.get(), Err(RagError::IndexNotReady)));
    }

    #[tokio::test]
    async fn persist_then_load_preserves_records() {
        let temp = tempfile::tempdir().unwrap();
        let records = vec![record("alpha", vec![0.5, 0.5]), record("beta", vec![-0.5, 0.5])];
        let index = VectorIndex::build(records, DistanceMetric::Cosine).unwrap();
        index.persist(temp.path()).await.unwrap();

        let loaded = VectorIndex::load(temp.path(), Some(2)).await.unwrap();
        assert_eq!(loaded.generation(), index.generation());
        assert_eq!(loaded.metric(), DistanceMetric::Cosine);
        assert_eq!(loaded.records(), index.records());

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn load_rejects_missing_corrupt_and_mismatched_indexes() {
        let temp = tempfile::tempdir().unwrap();
        let missing = VectorIndex::load(temp.path(), None).await.unwrap_err();
        assert!(matches!(missing, RagError::IndexLoad { .. }));

        std::fs::write(temp.path().join(INDEX_FILE_NAME), b"{ not json").unwrap();
        let corrupt = VectorIndex::load(temp.path(), None).await.unwrap_err();
        assert!(matches!(
            corrupt,
            RagError::IndexLoad { message, .. } if message.contains("malformed")
        ));

        let index =
            VectorIndex::build(vec![record("a", vec![1.0, 0.0, 0.0])], DistanceMetric::L2Squared)
                .unwrap();
        index.persist(temp.path()).await.unwrap();
        let mismatched = VectorIndex::load(temp.path(), Some(384)).await.unwrap_err();
        assert!(matches!(
            mismatched,
            RagError::IndexLoad { message, .. } if message.contains("384")
        ));
    }

    #[tokio::test]
    async fn load_rejects_foreign_format() {
        let temp = tempfile::tempdir().unwrap();
        let foreign = serde_json::json!({
            "format": "something-else",
            "version": 1,
            "generation": Uuid::new_v4(),
            "created_at": Utc::now(),
            "metric": "cosine",
            "dimensions": 1,
            "records": [],
        });
        std::fs::write(temp.path().join(INDEX_FILE_NAME), foreign.to_string()).unwrap();
        let err = VectorIndex::load(temp.path(), None).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::IndexLoad { message, .. } if message.contains("unsupported")
        ));
    }
}
