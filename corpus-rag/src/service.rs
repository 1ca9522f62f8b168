//! The retrieval service: owns the active index and answers queries.
//!
//! [`RetrievalService`] moves through three states:
//!
//! - `Uninitialized` until [`initialize`](RetrievalService::initialize) runs
//! - `Ready` once an index has been loaded or built
//! - `Failed` if initialization fails; the service does not retry
//!
//! A successful [`rebuild`](RetrievalService::rebuild) builds a brand-new
//! [`VectorIndex`] and swaps it in under a write lock. Queries clone the
//! `Arc` of whichever generation is active when they start, so a rebuild
//! never changes the index an in-flight query is reading.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::document::QueryResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{IndexHandle, VectorIndex};
use crate::pipeline::{IndexingPipeline, IndexingReport, persist_to};

/// Indexes larger than this are searched on a blocking thread.
const BLOCKING_SEARCH_THRESHOLD: usize = 4096;

/// Lifecycle state of a [`RetrievalService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// No index has been loaded or built yet.
    Uninitialized,
    /// An index is active and queries are served.
    Ready,
    /// Initialization failed.
    Failed,
}

#[derive(Debug)]
struct ActiveIndex {
    state: ServiceState,
    handle: IndexHandle,
}

/// Serves similarity queries against the active index generation.
pub struct RetrievalService {
    pipeline: IndexingPipeline,
    active: Arc<RwLock<ActiveIndex>>,
    rebuild_lock: Arc<Mutex<()>>,
}

impl RetrievalService {
    /// Create an uninitialized service around `pipeline`. The pipeline's
    /// config and embedder are used for every query and rebuild.
    pub fn new(pipeline: IndexingPipeline) -> Self {
        Self {
            pipeline,
            active: Arc::new(RwLock::new(ActiveIndex {
                state: ServiceState::Uninitialized,
                handle: IndexHandle::new(),
            })),
            rebuild_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The service configuration.
    pub fn config(&self) -> &RagConfig {
        self.pipeline.config()
    }

    fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        self.pipeline.embedding_provider()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceState {
        self.active.read().await.state
    }

    /// Whether queries can be served.
    pub async fn is_ready(&self) -> bool {
        self.state().await == ServiceState::Ready
    }

    /// The generation of the active index, if any.
    pub async fn generation(&self) -> Option<Uuid> {
        self.active.read().await.handle.get().ok().map(|index| index.generation())
    }

    /// Number of records in the active index (0 when not ready).
    pub async fn record_count(&self) -> usize {
        self.active.read().await.handle.get().map_or(0, |index| index.len())
    }

    /// Load the persisted index, or build one from the corpus if none exists.
    ///
    /// On failure the service enters [`ServiceState::Failed`] and the error
    /// is returned; retrying is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexLoad`] if a persisted index exists but is
    /// invalid, or [`RagError::Pipeline`] if building a new one fails.
    pub async fn initialize(&self) -> Result<()> {
        let guard = Arc::clone(&self.rebuild_lock).lock_owned().await;
        let config = self.config();

        let result = if VectorIndex::exists(&config.index_dir) {
            info!(index_dir = %config.index_dir.display(), "loading existing index");
            VectorIndex::load(&config.index_dir, Some(self.embedding_provider().dimensions()))
                .await
                .map(Some)
        } else {
            info!(index_dir = %config.index_dir.display(), "no existing index, building a new one");
            match self.pipeline.build(&config.corpus_dir).await {
                Ok((index, _)) => self.commit(index, guard).await.map(|_| None),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(loaded) => {
                if let Some(index) = loaded {
                    self.activate(index).await;
                }
                info!(records = self.record_count().await, "retrieval service ready");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "retrieval service initialization failed");
                self.active.write().await.state = ServiceState::Failed;
                Err(e)
            }
        }
    }

    /// Make `index` the active generation and mark the service ready.
    ///
    /// Queries already running keep the generation they started with.
    pub async fn activate(&self, index: VectorIndex) -> Uuid {
        swap_in(&self.active, index).await
    }

    /// Persist `index` and make it the active generation as one step.
    ///
    /// The work runs on its own task, so cancelling the caller once the
    /// commit has started cannot leave a persisted generation that was
    /// never activated. The task holds the rebuild lock until it is done.
    async fn commit(&self, index: VectorIndex, guard: OwnedMutexGuard<()>) -> Result<Uuid> {
        let active = Arc::clone(&self.active);
        let index_dir = self.config().index_dir.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            persist_to(&index, &index_dir).await?;
            Ok(swap_in(&active, index).await)
        });
        task.await.map_err(|e| RagError::Pipeline(format!("index commit failed: {e}")))?
    }

    /// Re-index the whole corpus and swap in the new generation.
    ///
    /// Rebuilds are serialised. If the rebuild fails the previous generation
    /// keeps serving and the state is unchanged. Dropping the returned future
    /// while the new index is being built discards it and leaves both the
    /// active and the persisted index untouched. Once the build is complete
    /// it is persisted and activated together, even if the caller goes away.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Pipeline`] if the indexing run fails.
    pub async fn rebuild(&self) -> Result<IndexingReport> {
        let guard = Arc::clone(&self.rebuild_lock).lock_owned().await;
        info!("rebuilding index");

        let built = self.pipeline.build(&self.config().corpus_dir).await;
        let committed = match built {
            Ok((index, report)) => self.commit(index, guard).await.map(|_| report),
            Err(e) => Err(e),
        };
        match committed {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "rebuild failed, keeping previous index generation");
                Err(e)
            }
        }
    }

    /// Run [`rebuild`](Self::rebuild) on a background task.
    pub fn spawn_rebuild(self: &Arc<Self>) -> RebuildHandle {
        let service = Arc::clone(self);
        RebuildHandle { task: tokio::spawn(async move { service.rebuild().await }) }
    }

    /// Retrieve the `k` chunks nearest to `query`, using the configured query timeout.
    ///
    /// # Errors
    ///
    /// See [`retrieve_with_timeout`](Self::retrieve_with_timeout).
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<QueryResult>> {
        self.retrieve_with_timeout(query, k, self.config().query_timeout).await
    }

    /// Retrieve the `k` chunks nearest to `query`, ordered by ascending distance.
    ///
    /// An empty result means the index holds nothing for this query; every
    /// failure is reported as an error instead.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidQuery`] if `query` is blank or `k` is zero, in any state
    /// - [`RagError::NotReady`] if no index is active
    /// - [`RagError::Timeout`] if `timeout` elapses first; no partial results are returned
    /// - [`RagError::Embedding`] if the query cannot be embedded
    pub async fn retrieve_with_timeout(
        &self,
        query: &str,
        k: usize,
        timeout: Duration,
    ) -> Result<Vec<QueryResult>> {
        validate_query(query, k)?;

        tokio::time::timeout(timeout, self.search(query, k)).await.unwrap_or_else(|_| {
            warn!(query, ?timeout, "query timed out");
            Err(RagError::Timeout { query: query.to_string(), timeout })
        })
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<QueryResult>> {
        let index = {
            let active = self.active.read().await;
            if active.state != ServiceState::Ready {
                return Err(RagError::NotReady { query: query.to_string() });
            }
            active.handle.get().map_err(|_| RagError::NotReady { query: query.to_string() })?
        };

        let vector = self.embedding_provider().embed(query).await?;

        let results = if index.len() > BLOCKING_SEARCH_THRESHOLD {
            tokio::task::spawn_blocking(move || index.search(&vector, k))
                .await
                .map_err(|e| RagError::Pipeline(format!("search task failed: {e}")))??
        } else {
            index.search(&vector, k)?
        };

        debug!(query, k, result_count = results.len(), "query completed");
        Ok(results.into_iter().map(QueryResult::from).collect())
    }
}

async fn swap_in(active: &RwLock<ActiveIndex>, index: VectorIndex) -> Uuid {
    let generation = index.generation();
    let index = Arc::new(index);
    let mut active = active.write().await;
    let previous = active.handle.get().ok().map(|old| old.generation());
    active.handle.set(index);
    active.state = ServiceState::Ready;
    info!(%generation, ?previous, "activated index generation");
    generation
}

fn validate_query(query: &str, k: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidQuery {
            query: query.to_string(),
            reason: "query is required".to_string(),
        });
    }
    if k == 0 {
        return Err(RagError::InvalidQuery {
            query: query.to_string(),
            reason: "top_k must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// A background rebuild started by [`RetrievalService::spawn_rebuild`].
#[derive(Debug)]
pub struct RebuildHandle {
    task: JoinHandle<Result<IndexingReport>>,
}

impl RebuildHandle {
    /// Cancel the rebuild. The active index is left untouched.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the rebuild has finished (successfully, with an error, or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the rebuild to finish.
    ///
    /// # Errors
    ///
    /// Returns the rebuild's own error, or [`RagError::Pipeline`] if it was
    /// cancelled or panicked.
    pub async fn wait(self) -> Result<IndexingReport> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(RagError::Pipeline("rebuild cancelled".to_string())),
            Err(e) => Err(RagError::Pipeline(format!("rebuild task failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::extractor::TextExtractor;

    fn service(corpus: &std::path::Path, index_dir: &std::path::Path) -> RetrievalService {
        service_with(corpus, index_dir, Arc::new(HashingEmbedder::new(64)))
    }

    fn service_with(
        corpus: &std::path::Path,
        index_dir: &std::path::Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> RetrievalService {
        let pipeline = IndexingPipeline::builder()
            .config(
                RagConfig::builder()
                    .corpus_dir(corpus)
                    .index_dir(index_dir)
                    .chunk_size(200)
                    .chunk_overlap(40)
                    .build()
                    .unwrap(),
            )
            .extractor(Arc::new(TextExtractor::new()))
            .embedding_provider(embedder)
            .build()
            .unwrap();
        RetrievalService::new(pipeline)
    }

    /// Signals when embedding starts, then waits for a permit that never comes.
    struct StalledEmbedder {
        inner: HashingEmbedder,
        entered: Arc<Notify>,
        release: Semaphore,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for StalledEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.entered.notify_one();
            let _permit = self.release.acquire().await.map_err(|e| RagError::Embedding {
                provider: "stalled".to_string(),
                message: e.to_string(),
            })?;
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    async fn persisted_generation(index_dir: &std::path::Path) -> Uuid {
        VectorIndex::load(index_dir, Some(64)).await.unwrap().generation()
    }

    #[tokio::test]
    async fn empty_query_is_rejected_in_any_state() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let service = service(corpus.path(), index_dir.path());

        assert_eq!(service.state().await, ServiceState::Uninitialized);
        let err = service.retrieve("", 5).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery { .. }));
        let err = service.retrieve("   ", 5).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn queries_before_initialize_are_not_ready() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let service = service(corpus.path(), index_dir.path());

        let err = service.retrieve("breathing", 3).await.unwrap_err();
        assert!(matches!(err, RagError::NotReady { query } if query == "breathing"));
    }

    #[tokio::test]
    async fn zero_k_is_invalid() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let service = service(corpus.path(), index_dir.path());
        let err = service.retrieve("breathing", 0).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery { reason, .. } if reason.contains("top_k")));
    }

    #[tokio::test]
    async fn failed_initialize_enters_failed_state() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let service = service(corpus.path(), index_dir.path());

        let err = service.initialize().await.unwrap_err();
        assert!(matches!(err, RagError::Pipeline(_)));
        assert_eq!(service.state().await, ServiceState::Failed);
        assert!(matches!(service.retrieve("anything", 1).await, Err(RagError::NotReady { .. })));
    }

    #[tokio::test]
    async fn initialize_builds_then_reloads_persisted_index() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        fs::write(corpus.path().join("calm.txt"), "Progressive muscle relaxation.").unwrap();

        let first = service(corpus.path(), index_dir.path());
        first.initialize().await.unwrap();
        let generation = first.generation().await.unwrap();

        let second = service(corpus.path(), index_dir.path());
        second.initialize().await.unwrap();
        assert!(second.is_ready().await);
        assert_eq!(second.generation().await, Some(generation));
        assert_eq!(second.record_count().await, 1);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_generation() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let path = corpus.path().join("calm.txt");
        fs::write(&path, "Grounding with five senses.").unwrap();

        let service = service(corpus.path(), index_dir.path());
        service.initialize().await.unwrap();
        let generation = service.generation().await;

        fs::remove_file(&path).unwrap();
        assert!(service.rebuild().await.is_err());
        assert_eq!(service.generation().await, generation);
        assert_eq!(service.state().await, ServiceState::Ready);
        assert_eq!(service.retrieve("senses", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn aborted_rebuild_leaves_active_index_untouched() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        fs::write(corpus.path().join("calm.txt"), "Mindful walking.").unwrap();

        let service = Arc::new(service(corpus.path(), index_dir.path()));
        service.initialize().await.unwrap();
        let generation = service.generation().await;

        // Holding the rebuild lock keeps the spawned rebuild from making progress.
        let guard = service.rebuild_lock.lock().await;
        let handle = service.spawn_rebuild();
        handle.abort();
        drop(guard);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, RagError::Pipeline(msg) if msg.contains("cancelled")));
        assert_eq!(service.generation().await, generation);
    }

    #[tokio::test]
    async fn rebuild_cancelled_mid_build_keeps_disk_and_memory() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let path = corpus.path().join("calm.txt");
        fs::write(&path, "Paced breathing.").unwrap();
        service(corpus.path(), index_dir.path()).initialize().await.unwrap();
        let original = persisted_generation(index_dir.path()).await;

        let entered = Arc::new(Notify::new());
        let stalled = Arc::new(service_with(
            corpus.path(),
            index_dir.path(),
            Arc::new(StalledEmbedder {
                inner: HashingEmbedder::new(64),
                entered: Arc::clone(&entered),
                release: Semaphore::new(0),
            }),
        ));
        stalled.initialize().await.unwrap();
        assert_eq!(stalled.generation().await, Some(original));

        fs::write(&path, "Cold water on the face.").unwrap();
        let handle = stalled.spawn_rebuild();
        entered.notified().await;
        handle.abort();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, RagError::Pipeline(msg) if msg.contains("cancelled")));
        assert_eq!(stalled.generation().await, Some(original));
        assert_eq!(persisted_generation(index_dir.path()).await, original);
    }

    #[tokio::test]
    async fn rebuild_cancelled_during_commit_still_activates_what_it_persisted() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        fs::write(corpus.path().join("calm.txt"), "Counting backwards from ten.").unwrap();

        let service = Arc::new(service(corpus.path(), index_dir.path()));
        service.initialize().await.unwrap();
        let original = persisted_generation(index_dir.path()).await;

        // A held read lock stalls the swap after the new index is on disk.
        let reader = service.active.read().await;
        let handle = service.spawn_rebuild();
        let on_disk = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let generation = persisted_generation(index_dir.path()).await;
                if generation != original {
                    return generation;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();
        drop(reader);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, RagError::Pipeline(msg) if msg.contains("cancelled")));

        tokio::time::timeout(Duration::from_secs(10), async {
            while service.generation().await != Some(on_disk) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The rebuild lock was released with the commit.
        let report = service.rebuild().await.unwrap();
        assert_eq!(service.generation().await, Some(report.generation));
        assert_eq!(persisted_generation(index_dir.path()).await, report.generation);
    }
}
