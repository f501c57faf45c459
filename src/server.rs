//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question, optionally with a screenshot |
//! | `POST` | `/admin/reload` | Reload the chunk store from SQLite and swap it in |
//! | `GET`  | `/health` | Health check with partition counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `embedding_error` | 502 |
//! | `response_format` | 502 |
//! | `upstream` | 502 |
//! | `timeout` | 504 |
//! | `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! course tools can call the API directly.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use virtual_ta_core::answer::Orchestrator;
use virtual_ta_core::error::QueryError;
use virtual_ta_core::models::{AnswerResponse, SourceType};
use virtual_ta_core::store::{EmbeddingSpec, StoreHandle};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::llm::OpenAiChatClient;
use crate::ocr::{resolve_image_text, OcrEngine, TesseractOcr};
use crate::sqlite_store::load_store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<StoreHandle>,
    orchestrator: Orchestrator,
    ocr: Option<Arc<dyn OcrEngine>>,
    db_path: PathBuf,
    expected: Option<EmbeddingSpec>,
    request_timeout: Duration,
    body_limit: usize,
}

impl AppState {
    /// State serving `store`, reloadable from `db_path`.
    pub fn new(store: Arc<StoreHandle>, orchestrator: Orchestrator, db_path: PathBuf) -> Self {
        Self {
            store,
            orchestrator,
            ocr: None,
            db_path,
            expected: None,
            request_timeout: Duration::from_secs(120),
            body_limit: 16 * 1024 * 1024,
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Embedding model a reloaded store must match.
    pub fn with_expected_embedding(mut self, spec: EmbeddingSpec) -> Self {
        self.expected = Some(spec);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Maximum request body size in bytes.
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}

/// Build the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.body_limit;

    Router::new()
        .route("/query", post(handle_query))
        .route("/admin/reload", post(handle_reload))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Load the knowledge base and serve until the process is terminated.
///
/// A store that fails to load is fatal: the server never starts with a
/// partial or mismatched knowledge base.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let expected = config
        .embedding
        .is_enabled()
        .then(|| EmbeddingSpec::of(embedder.as_ref()));

    let store = load_store(&config.db.path, expected.as_ref())
        .await
        .context("Failed to load knowledge base")?;

    let llm = Arc::new(OpenAiChatClient::from_config(&config.llm)?);
    let orchestrator = Orchestrator::new(embedder, llm, config.answer_settings());

    let mut state = AppState::new(
        Arc::new(StoreHandle::new(store)),
        orchestrator,
        config.db.path.clone(),
    )
    .with_request_timeout(Duration::from_secs(config.server.request_timeout_secs))
    .with_body_limit(config.server.max_body_bytes);
    if let Some(spec) = expected {
        state = state.with_expected_embedding(spec);
    }
    if config.ocr.enabled {
        state = state.with_ocr(Arc::new(TesseractOcr::new(&config.ocr)));
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    println!("Virtual TA listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let code = err.code();
        let status = match code {
            "bad_request" => StatusCode::BAD_REQUEST,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, code, err.to_string())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

// ============ POST /query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// Base64-encoded screenshot.
    #[serde(default)]
    pub image: Option<String>,
    /// Text already extracted from the screenshot; wins over `image`.
    #[serde(default)]
    pub image_text: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("query", %request_id);

    let timeout = state.request_timeout;
    let work = answer_request(state, req).instrument(span.clone());

    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(resp)) => Ok(Json(resp)),
        Ok(Err(err)) => {
            span.in_scope(|| tracing::warn!(code = err.code(), error = %err, "query failed"));
            Err(err.into())
        }
        Err(_) => {
            span.in_scope(|| tracing::warn!(timeout_secs = timeout.as_secs(), "query timed out"));
            Err(AppError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                format!("request exceeded {}s", timeout.as_secs()),
            ))
        }
    }
}

async fn answer_request(state: AppState, req: QueryRequest) -> Result<AnswerResponse, QueryError> {
    tracing::info!(
        question_chars = req.question.chars().count(),
        has_image = req.image.is_some(),
        has_image_text = req.image_text.is_some(),
        "query received"
    );
    if req.question.trim().is_empty() {
        return Err(QueryError::InvalidQuestion);
    }

    let image_text = resolve_image_text(
        state.ocr.as_deref(),
        req.image.as_deref(),
        req.image_text.as_deref(),
    )
    .await;

    let store = state.store.snapshot();
    let resp = state
        .orchestrator
        .answer(&store, &req.question, image_text.as_deref())
        .await?;
    tracing::info!(links = resp.links.len(), "query answered");
    Ok(resp)
}

// ============ POST /admin/reload ============

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub course_chunks: usize,
    pub forum_chunks: usize,
}

async fn handle_reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, AppError> {
    let store = load_store(&state.db_path, state.expected.as_ref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "reload failed; keeping current store");
            internal(format!("reload failed: {}", e))
        })?;

    let course_chunks = store.count(SourceType::Course);
    let forum_chunks = store.count(SourceType::Forum);
    state.store.replace(store);

    Ok(Json(ReloadResponse {
        status: "reloaded".to_string(),
        course_chunks,
        forum_chunks,
    }))
}

// ============ GET /health ============

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub course_chunks: usize,
    pub forum_chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.store.snapshot();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        course_chunks: store.count(SourceType::Course),
        forum_chunks: store.count(SourceType::Forum),
    })
}
