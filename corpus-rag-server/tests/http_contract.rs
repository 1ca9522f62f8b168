use std::{path::Path, sync::Arc};

use corpus_rag::{HashingEmbedder, IndexingPipeline, RagConfig, RetrievalService, TextExtractor};
use corpus_rag_server::{AppState, app_router};
use serde_json::{Value, json};

fn service(corpus: &Path, index_dir: &Path) -> Arc<RetrievalService> {
    let config =
        RagConfig::builder().corpus_dir(corpus).index_dir(index_dir).build().expect("config");
    let pipeline = IndexingPipeline::builder()
        .config(config)
        .extractor(Arc::new(TextExtractor::new().with_extensions(&["pdf"])))
        .embedding_provider(Arc::new(HashingEmbedder::new(64)))
        .build()
        .expect("pipeline");
    Arc::new(RetrievalService::new(pipeline))
}

async fn spawn_server(service: Arc<RetrievalService>) -> (String, tokio::task::JoinHandle<()>) {
    let app = app_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn retrieve_returns_chunks_with_provenance() {
    let corpus = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let text = "Breathing helps anxiety. ".repeat(60);
    std::fs::write(corpus.path().join("anxiety.pdf"), text).unwrap();
    let service = service(corpus.path(), index_dir.path());
    service.initialize().await.expect("initialize");

    let (base, handle) = spawn_server(service).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/retrieve", base))
        .json(&json!({"query": "breathing techniques", "top_k": 3}))
        .send()
        .await
        .expect("retrieve response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: Value = response.json().await.expect("retrieve json");
    let chunks = body["chunks"].as_array().expect("chunks array");
    assert!(!chunks.is_empty() && chunks.len() <= 3);
    for chunk in chunks {
        assert_eq!(chunk["source"], "anxiety.pdf");
        assert!(chunk["text"].as_str().is_some_and(|t| !t.is_empty()));
        assert!(chunk["chunk_id"].as_u64().is_some_and(|id| id < 10_000));
        assert_eq!(chunk["page"], 1);
        assert!(chunk["score"].is_number());
    }

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .expect("health response")
        .json()
        .await
        .expect("health json");
    assert_eq!(
        health,
        json!({"status": "healthy", "service": "rag-retrieval-service", "indexed": true})
    );

    handle.abort();
}

#[tokio::test]
async fn invalid_requests_are_rejected_with_400() {
    let corpus = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    std::fs::write(corpus.path().join("sleep.pdf"), "Keep a regular bedtime.").unwrap();
    let service = service(corpus.path(), index_dir.path());
    service.initialize().await.expect("initialize");

    let (base, handle) = spawn_server(service).await;
    let client = reqwest::Client::new();

    for body in [json!({"top_k": 3}), json!({"query": ""}), json!({"query": "sleep", "top_k": 0})] {
        let response =
            client.post(format!("{}/retrieve", base)).json(&body).send().await.expect("response");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "body {body}");
        let error: Value = response.json().await.expect("error json");
        assert!(error["error"].is_string());
        assert!(error.get("query").is_some());
    }

    let malformed = client
        .post(format!("{}/retrieve", base))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .expect("response");
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);

    handle.abort();
}

#[tokio::test]
async fn unindexed_service_reports_unavailable_until_reindexed() {
    let corpus = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let service = service(corpus.path(), index_dir.path());
    assert!(service.initialize().await.is_err());

    let (base, handle) = spawn_server(service).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .expect("health response")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["indexed"], false);

    let response = client
        .post(format!("{}/retrieve", base))
        .json(&json!({"query": "anything"}))
        .send()
        .await
        .expect("retrieve response");
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let failed = client.post(format!("{}/reindex", base)).send().await.expect("reindex response");
    assert_eq!(failed.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    std::fs::write(corpus.path().join("grief.pdf"), "Grief comes in waves.").unwrap();
    let reindexed =
        client.post(format!("{}/reindex", base)).send().await.expect("reindex response");
    assert!(reindexed.status().is_success());
    let body: Value = reindexed.json().await.expect("reindex json");
    assert_eq!(body, json!({"status": "reindexed"}));

    let response = client
        .post(format!("{}/retrieve", base))
        .json(&json!({"query": "waves"}))
        .send()
        .await
        .expect("retrieve response");
    assert!(response.status().is_success());

    handle.abort();
}

#[tokio::test]
async fn cors_preflight_is_allowed() {
    let corpus = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let (base, handle) = spawn_server(service(corpus.path(), index_dir.path())).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/retrieve", base))
        .header("Origin", "http://example.com")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .expect("preflight response");
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("access-control-allow-origin"));

    handle.abort();
}
