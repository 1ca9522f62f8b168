use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use corpus_rag::{
    RagError, RetrievalService,
    api::{self, HealthResponse, ReindexResponse, SearchRequest, SearchResponse},
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RetrievalService>,
}

impl AppState {
    pub fn new(service: Arc<RetrievalService>) -> Self {
        Self { service }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

impl ServerConfig {
    /// Read `RAG_HOST` and `RAG_PORT`, falling back to `0.0.0.0:8000`.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let host = std::env::var("RAG_HOST").unwrap_or(defaults.host);
        let port = match std::env::var("RAG_PORT") {
            Ok(value) => {
                value.parse::<u16>().with_context(|| format!("invalid RAG_PORT `{value}`"))?
            }
            Err(_) => defaults.port,
        };
        Ok(Self { host, port })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid host/port `{}:{}`", self.host, self.port))
    }
}

/// A [`RagError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl From<RagError> for ApiError {
    fn from(error: RagError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RagError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            RagError::NotReady { .. } | RagError::IndexNotReady => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn query(&self) -> Option<&str> {
        match &self.0 {
            RagError::InvalidQuery { query, .. }
            | RagError::NotReady { query }
            | RagError::Timeout { query, .. } => Some(query),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "request rejected");
        }

        let body = match self.query() {
            Some(query) => json!({ "error": self.0.to_string(), "query": query }),
            None => json!({ "error": self.0.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/retrieve", post(retrieve))
        .route("/health", get(health))
        .route("/reindex", post(reindex))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(
    config: ServerConfig,
    service: Arc<RetrievalService>,
) -> anyhow::Result<()> {
    let app = app_router(AppState::new(service));
    let addr = config.socket_addr()?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("rag-retrieval-service listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn retrieve(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| RagError::InvalidQuery {
        query: String::new(),
        reason: rejection.body_text(),
    })?;
    Ok(Json(api::search(&state.service, request).await?))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(api::health(&state.service).await)
}

async fn reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>, ApiError> {
    Ok(Json(api::reindex(&state.service).await?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (RagError::InvalidQuery { query: String::new(), reason: "empty".into() }, 400),
            (RagError::NotReady { query: "q".into() }, 503),
            (RagError::IndexNotReady, 503),
            (RagError::Timeout { query: "q".into(), timeout: Duration::from_secs(1) }, 504),
            (RagError::Pipeline("no documents".into()), 500),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status().as_u16(), expected);
        }
    }

    #[test]
    fn query_is_echoed_only_for_query_errors() {
        assert_eq!(ApiError(RagError::NotReady { query: "sleep".into() }).query(), Some("sleep"));
        assert_eq!(ApiError(RagError::Pipeline("x".into())).query(), None);
    }

    #[test]
    fn default_config_binds_all_interfaces() {
        let addr = ServerConfig::default().socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8000");
    }
}
