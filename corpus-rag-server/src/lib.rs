//! `corpus-rag-server` exposes a [`corpus_rag::RetrievalService`] over HTTP.
//!
//! Routes: `POST /retrieve`, `GET /health`, `POST /reindex`.

pub mod embedder;
pub mod server;

pub use embedder::{EmbedderKind, build_embedder};
pub use server::{ApiError, AppState, ServerConfig, app_router, run_server};
