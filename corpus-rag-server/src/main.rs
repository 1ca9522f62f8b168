use std::sync::Arc;

use corpus_rag::{IndexingPipeline, PdfExtractor, RagConfig, RetrievalService};
use corpus_rag_server::{EmbedderKind, ServerConfig, build_embedder, run_server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RagConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;
    let embedder_kind = EmbedderKind::from_env()?;
    tracing::info!(
        corpus_dir = %config.corpus_dir.display(),
        index_dir = %config.index_dir.display(),
        embedder = ?embedder_kind,
        "starting rag-retrieval-service"
    );

    let pipeline = IndexingPipeline::builder()
        .config(config)
        .extractor(Arc::new(PdfExtractor::new()))
        .embedding_provider(build_embedder(embedder_kind)?)
        .build()?;
    let service = Arc::new(RetrievalService::new(pipeline));

    // Keep serving /health and /reindex when the first build fails.
    if let Err(e) = service.initialize().await {
        tracing::error!(
            error = %e,
            "initial indexing failed; retrieval unavailable until /reindex succeeds"
        );
    }

    run_server(server_config, service).await
}
