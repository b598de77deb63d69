//! HTTP search surface.
//!
//! Exposes the hybrid query engine over a small JSON API for local
//! callers (a chat front-end, editor plugins, scripts).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Hybrid query: `{query, k?, source_filter?, collection?}` |
//! | `GET`  | `/health` | Health check (returns status, model, version) |
//! | `GET`  | `/collections` | List collection names |
//! | `POST` | `/collections/{name}/reload` | Re-open a collection after ingestion |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: k must be >= 1, got 0" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | `k <= 0` |
//! | `not_found` | 404 | unknown collection |
//! | `embedding_unavailable` | 503 | provider unreachable |
//! | `timeout` | 504 | provider timed out |
//! | `configuration` | 500 | model/dims mismatch, disabled provider |
//! | `index_corrupted` | 500 | collection cannot be loaded intact |
//!
//! # State
//!
//! Collections are loaded on first use and cached in [`AppState`]. A
//! cached collection is only replaced by an explicit reload, so a query
//! never observes an ingestion in progress.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use secure_rag_core::embedding::EmbeddingProvider;
use secure_rag_core::error::RetrievalError;
use secure_rag_core::instance::IndexInstance;
use secure_rag_core::models::SearchHit;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::search::{query, QueryRequest, QuerySettings};
use crate::store::InstanceStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    provider: Arc<dyn EmbeddingProvider>,
    settings: Arc<QuerySettings>,
    store: InstanceStore,
    instances: Arc<RwLock<HashMap<String, Arc<IndexInstance>>>>,
}

impl AppState {
    pub fn new(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        Ok(Self {
            settings: Arc::new(QuerySettings::from_config(&config.retrieval)?),
            store: InstanceStore::new(&config.storage.base_dir),
            config: Arc::new(config.clone()),
            provider,
            instances: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Cached collection, loading it on first use.
    async fn instance(&self, name: &str) -> Result<Arc<IndexInstance>, AppError> {
        if let Some(inst) = self.instances.read().await.get(name) {
            return Ok(inst.clone());
        }
        let inst = self.load(name).await?;
        let mut cache = self.instances.write().await;
        Ok(cache.entry(name.to_string()).or_insert(inst).clone())
    }

    /// Load `name` from disk and replace the cached copy.
    async fn reload(&self, name: &str) -> Result<Arc<IndexInstance>, AppError> {
        let inst = self.load(name).await?;
        self.instances
            .write()
            .await
            .insert(name.to_string(), inst.clone());
        Ok(inst)
    }

    async fn load(&self, name: &str) -> Result<Arc<IndexInstance>, AppError> {
        if !self.store.exists(name) {
            return Err(not_found(format!("no collection named '{}'", name)));
        }
        let store = self.store.clone();
        let owned = name.to_string();
        let inst = tokio::task::spawn_blocking(move || store.open_instance(&owned))
            .await
            .map_err(|e| RetrievalError::Transient(format!("collection load aborted: {}", e)))??;
        info!(
            collection = name,
            documents = inst.document_count(),
            chunks = inst.chunk_count(),
            "collection loaded"
        );
        Ok(Arc::new(inst))
    }
}

/// Build the router. Split out from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .route("/collections", get(handle_list_collections))
        .route("/collections/{name}/reload", post(handle_reload))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = create_provider(&config.embedding)?;
    let state = AppState::new(config, provider)?;

    // Fail fast on a broken default collection instead of on the first query.
    let default = &config.storage.default_collection;
    if state.store.exists(default) {
        state.reload(default).await.map_err(|e| anyhow::anyhow!(e.message))?;
    } else {
        warn!(collection = %default, "default collection does not exist yet");
    }

    let app = build_router(state);
    let bind_addr = config.server.bind.clone();
    info!(bind = %bind_addr, "search server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
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

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        let message = err.to_string();
        match err {
            RetrievalError::InvalidQuery(_) => {
                app_error(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            RetrievalError::Transient(ref m) if m.contains("timed out") => {
                app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            RetrievalError::Transient(_) => app_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "embedding_unavailable",
                message,
            ),
            RetrievalError::Configuration(_) => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "configuration", message)
            }
            RetrievalError::Corrupted(_) => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "index_corrupted", message)
            }
        }
    }
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    k: Option<i64>,
    #[serde(default)]
    source_filter: Option<String>,
    #[serde(default)]
    collection: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let collection = body
        .collection
        .unwrap_or_else(|| state.config.storage.default_collection.clone());
    let instance = state.instance(&collection).await?;

    let request = QueryRequest {
        query: body.query,
        k: body.k.unwrap_or(state.config.retrieval.default_k as i64),
        source_filter: body.source_filter,
    };
    let hits = query(&instance, state.provider.as_ref(), &request, &state.settings).await?;
    Ok(Json(hits))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// Embedding model queries are embedded with.
    model: String,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.provider.model_name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /collections ============

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<String>,
}

async fn handle_list_collections(
    State(state): State<AppState>,
) -> Result<Json<CollectionsResponse>, AppError> {
    Ok(Json(CollectionsResponse {
        collections: state.store.list_instances()?,
    }))
}

// ============ POST /collections/{name}/reload ============

#[derive(Serialize)]
struct ReloadResponse {
    collection: String,
    documents: usize,
    chunks: usize,
    generation: u64,
}

async fn handle_reload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ReloadResponse>, AppError> {
    let inst = state.reload(&name).await?;
    Ok(Json(ReloadResponse {
        collection: name,
        documents: inst.document_count(),
        chunks: inst.chunk_count(),
        generation: inst.generation(),
    }))
}
