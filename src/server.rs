//! HTTP API server.
//!
//! Thin transport over the pipeline: routes parse the request, call into
//! [`crate::pipeline`] / [`crate::versions`] / [`crate::lineage`], and shape
//! the response. No change-detection logic lives here.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/fetch-docs` | Fetch and ingest the configured documents |
//! | `POST` | `/generate-diffs` | Generate AI diffs for changed documents |
//! | `GET`  | `/diffs` | Latest-diff status per document |
//! | `GET`  | `/diffs/{id}` | Latest diff for one document |
//! | `GET`  | `/diffs/{id}/history` | Diff generation timestamps |
//! | `GET`  | `/diffs/{id}/{timestamp}` | A specific diff artifact |
//! | `GET`  | `/tos` | Version summary per document |
//! | `GET`  | `/tos/{id}` | Detailed version info for one document |
//! | `GET`  | `/tos/{id}/{version}` | Plain text of one version |
//! | `POST` | `/tos/{id}` | On-demand AI compare of two versions |
//! | `GET`  | `/health` | Storage and AI connectivity checks |
//! | `GET`  | `/config` | Document configuration echo |
//!
//! # Error Contract
//!
//! Batch endpoints always return `200` with a per-document breakdown; only
//! configuration and request-validation failures surface as error statuses,
//! with the body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "No documents configured" } }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::lineage::FALLBACK_PROMPT;
use crate::models::{DiffMetadata, DocumentConfig, VersionSummary};
use crate::pipeline::Pipeline;
use crate::store;
use crate::versions::VersionLabel;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
}

/// Start the HTTP server on the configured bind address.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/fetch-docs", post(handle_fetch_docs))
        .route("/generate-diffs", post(handle_generate_diffs))
        .route("/diffs", get(handle_list_diffs))
        .route("/diffs/{id}", get(handle_latest_diff))
        .route("/diffs/{id}/history", get(handle_diff_history))
        .route("/diffs/{id}/{timestamp}", get(handle_diff_by_timestamp))
        .route("/tos", get(handle_list_tos))
        .route("/tos/{id}", get(handle_get_tos).post(handle_analyze_tos))
        .route("/tos/{id}/{version}", get(handle_get_tos_version))
        .route("/health", get(handle_health))
        .route("/config", get(handle_config))
        .layer(cors)
        .with_state(state);

    tracing::info!("listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g. `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map document-resolution failures onto statuses: an id filter or empty
/// configuration is the caller's problem, unreadable storage is ours.
fn classify_config_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("No documents") {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

/// Parse an optional JSON request body: an empty body means "all defaults".
fn parse_body<T: serde::de::DeserializeOwned + Default>(body: &str) -> Result<T, AppError> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| bad_request(format!("Invalid request body: {}", e)))
}

// ============ POST /fetch-docs ============

#[derive(Debug, Default, Deserialize)]
struct FetchRequest {
    /// Inline document list; wins over `config/documents.json`.
    #[serde(default)]
    documents: Option<Vec<DocumentConfig>>,
    /// Restrict processing to these document ids.
    #[serde(default)]
    document_ids: Option<Vec<String>>,
    /// Snapshot even when no structural change is detected.
    #[serde(default)]
    force_update: bool,
}

async fn handle_fetch_docs(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<crate::models::FetchBatchResponse>, AppError> {
    let request: FetchRequest = parse_body(&body)?;

    let documents = state
        .pipeline
        .resolve_documents(request.documents, request.document_ids.as_deref())
        .await
        .map_err(classify_config_error)?;

    let response = state
        .pipeline
        .run_fetch_batch(&documents, request.force_update)
        .await;
    Ok(Json(response))
}

// ============ POST /generate-diffs ============

#[derive(Debug, Default, Deserialize)]
struct GenerateDiffsRequest {
    #[serde(default)]
    document_ids: Option<Vec<String>>,
    /// Regenerate even when the latest diff already covers the newest
    /// snapshot pair.
    #[serde(default)]
    force_regenerate: bool,
}

async fn handle_generate_diffs(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<crate::models::DiffBatchResponse>, AppError> {
    let request: GenerateDiffsRequest = parse_body(&body)?;

    let documents = state
        .pipeline
        .resolve_documents(None, request.document_ids.as_deref())
        .await
        .map_err(classify_config_error)?;

    let response = state
        .pipeline
        .run_diff_batch(&documents, request.force_regenerate)
        .await;
    Ok(Json(response))
}

// ============ GET /diffs ============

#[derive(Debug, Default, Deserialize)]
struct ListDiffsQuery {
    /// Only include documents that have at least one diff.
    #[serde(default)]
    has_changes_only: bool,
}

#[derive(Debug, Serialize)]
struct DocumentDiffInfo {
    document_id: String,
    document_name: String,
    url: String,
    latest_diff_timestamp: Option<String>,
    previous_snapshot_timestamp: Option<String>,
    current_snapshot_timestamp: Option<String>,
    generated_at: Option<String>,
    has_diff: bool,
}

#[derive(Debug, Serialize)]
struct DiffListResponse {
    success: bool,
    document_count: usize,
    documents: Vec<DocumentDiffInfo>,
}

async fn handle_list_diffs(
    State(state): State<AppState>,
    Query(query): Query<ListDiffsQuery>,
) -> Result<Json<DiffListResponse>, AppError> {
    let documents = state
        .pipeline
        .resolve_documents(None, None)
        .await
        .map_err(classify_config_error)?;

    let mut infos = Vec::new();
    for doc in &documents {
        let latest = state
            .pipeline
            .tracker
            .latest_diff(&doc.id)
            .await
            .map_err(|e| internal(e.to_string()))?;
        let history = state
            .pipeline
            .tracker
            .diff_history(&doc.id)
            .await
            .map_err(|e| internal(e.to_string()))?;

        let info = match latest {
            Some((_, metadata)) => DocumentDiffInfo {
                document_id: doc.id.clone(),
                document_name: doc.name.clone(),
                url: doc.url.clone(),
                latest_diff_timestamp: history.first().cloned(),
                previous_snapshot_timestamp: Some(metadata.previous_snapshot_timestamp),
                current_snapshot_timestamp: Some(metadata.current_snapshot_timestamp),
                generated_at: Some(metadata.generated_at),
                has_diff: true,
            },
            None => DocumentDiffInfo {
                document_id: doc.id.clone(),
                document_name: doc.name.clone(),
                url: doc.url.clone(),
                latest_diff_timestamp: None,
                previous_snapshot_timestamp: None,
                current_snapshot_timestamp: None,
                generated_at: None,
                has_diff: false,
            },
        };

        if query.has_changes_only && !info.has_diff {
            continue;
        }
        infos.push(info);
    }

    Ok(Json(DiffListResponse {
        success: true,
        document_count: infos.len(),
        documents: infos,
    }))
}

// ============ GET /diffs/{id}[/...] ============

#[derive(Debug, Serialize)]
struct DiffContent {
    document_id: String,
    content: String,
    metadata: DiffMetadata,
}

async fn handle_latest_diff(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DiffContent>, AppError> {
    let (content, metadata) = state
        .pipeline
        .tracker
        .latest_diff(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("No diff found for document: {}", id)))?;

    Ok(Json(DiffContent {
        document_id: id,
        content,
        metadata,
    }))
}

#[derive(Debug, Serialize)]
struct DiffHistoryResponse {
    document_id: String,
    count: usize,
    timestamps: Vec<String>,
}

async fn handle_diff_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DiffHistoryResponse>, AppError> {
    let timestamps = state
        .pipeline
        .tracker
        .diff_history(&id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(DiffHistoryResponse {
        document_id: id,
        count: timestamps.len(),
        timestamps,
    }))
}

async fn handle_diff_by_timestamp(
    State(state): State<AppState>,
    Path((id, timestamp)): Path<(String, String)>,
) -> Result<Json<DiffContent>, AppError> {
    let (content, metadata) = state
        .pipeline
        .tracker
        .diff_by_timestamp(&id, &timestamp)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("No diff {} for document: {}", timestamp, id)))?;

    Ok(Json(DiffContent {
        document_id: id,
        content,
        metadata,
    }))
}

// ============ GET /tos ============

async fn handle_list_tos(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, VersionSummary>>, AppError> {
    let documents = state
        .pipeline
        .resolve_documents(None, None)
        .await
        .map_err(classify_config_error)?;

    let mut result = BTreeMap::new();
    for doc in &documents {
        let summary = match state.pipeline.versions.summary(doc).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, "error summarizing document: {}", e);
                VersionSummary {
                    id: doc.id.clone(),
                    name: doc.name.clone(),
                    url: doc.url.clone(),
                    current: None,
                    last: None,
                    prev: None,
                    changed: false,
                    total: 0,
                    available_dates: Vec::new(),
                }
            }
        };
        result.insert(doc.id.clone(), summary);
    }

    Ok(Json(result))
}

// ============ GET /tos/{id} ============

#[derive(Debug, Serialize)]
struct VersionDetail {
    date: Option<String>,
    timestamp: Option<String>,
    content_length: Option<usize>,
    content_hash: Option<String>,
    structural_hash: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Serialize)]
struct DocumentDetails {
    #[serde(flatten)]
    summary: VersionSummary,
    details: BTreeMap<String, Option<VersionDetail>>,
}

fn version_detail(date: Option<&str>, snapshot: &crate::versions::Snapshot) -> VersionDetail {
    let meta = snapshot.metadata.as_ref();
    VersionDetail {
        date: date.map(str::to_string),
        timestamp: meta.map(|m| m.timestamp.clone()),
        content_length: meta.map(|m| m.content_length),
        content_hash: meta.map(|m| m.content_hash.clone()),
        structural_hash: meta.map(|m| m.structural_hash.clone()),
        title: meta.and_then(|m| m.title.clone()),
    }
}

async fn handle_get_tos(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetails>, AppError> {
    let documents = state
        .pipeline
        .resolve_documents(None, None)
        .await
        .map_err(classify_config_error)?;

    let doc = documents
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| not_found(format!("Document '{}' not found in configuration", id)))?;

    let versions = &state.pipeline.versions;
    let summary = versions
        .summary(doc)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let current = versions
        .read(&id, &VersionLabel::Current)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("Current version of document '{}' not found", id)))?;

    let mut details = BTreeMap::new();
    details.insert(
        "current".to_string(),
        Some(version_detail(summary.current.as_deref(), &current)),
    );

    for (name, date) in [("last", summary.last.clone()), ("prev", summary.prev.clone())] {
        let detail = match &date {
            Some(d) => versions
                .read(&id, &VersionLabel::Date(d.clone()))
                .await
                .map_err(|e| internal(e.to_string()))?
                .map(|snapshot| version_detail(Some(d), &snapshot)),
            None => None,
        };
        details.insert(name.to_string(), detail);
    }

    Ok(Json(DocumentDetails { summary, details }))
}

// ============ GET /tos/{id}/{version} ============

async fn handle_get_tos_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<String, AppError> {
    let label = VersionLabel::parse(&version);
    let snapshot = state
        .pipeline
        .versions
        .read(&id, &label)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| {
            not_found(format!(
                "Version '{}' of document '{}' not found",
                version, id
            ))
        })?;

    Ok(snapshot.content)
}

// ============ POST /tos/{id} ============

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default = "default_previous_version")]
    previous_version: String,
    #[serde(default = "default_current_version")]
    current_version: String,
}

fn default_previous_version() -> String {
    "prev".to_string()
}
fn default_current_version() -> String {
    "last".to_string()
}

impl Default for AnalyzeRequest {
    fn default() -> Self {
        Self {
            previous_version: default_previous_version(),
            current_version: default_current_version(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    document_id: String,
    document_name: String,
    previous_version: String,
    current_version: String,
    analysis: String,
    model: crate::models::ModelInfo,
    analyzed_at: String,
}

/// On-demand comparison of two stored versions. The result is returned to
/// the caller, not persisted; `/generate-diffs` owns the durable artifacts.
async fn handle_analyze_tos(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let request: AnalyzeRequest = parse_body(&body)?;

    let documents = state
        .pipeline
        .resolve_documents(None, None)
        .await
        .map_err(classify_config_error)?;
    let doc = documents
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| not_found(format!("Document '{}' not found in configuration", id)))?;

    let versions = &state.pipeline.versions;
    let previous = versions
        .read(&id, &VersionLabel::parse(&request.previous_version))
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| {
            not_found(format!(
                "Version '{}' of document '{}' not found",
                request.previous_version, id
            ))
        })?;
    let current = versions
        .read(&id, &VersionLabel::parse(&request.current_version))
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| {
            not_found(format!(
                "Version '{}' of document '{}' not found",
                request.current_version, id
            ))
        })?;

    let metadata = serde_json::json!({
        "document_id": id,
        "previous_version": request.previous_version,
        "current_version": request.current_version,
        "url": doc.url,
    });

    let analysis = state
        .pipeline
        .comparer
        .compare_documents(
            &previous.content,
            &current.content,
            &doc.name,
            FALLBACK_PROMPT,
            &metadata,
        )
        .await
        .map_err(|e| internal(format!("Analysis failed: {}", e)))?;

    Ok(Json(AnalyzeResponse {
        document_id: id,
        document_name: doc.name.clone(),
        previous_version: request.previous_version,
        current_version: request.current_version,
        analysis,
        model: state.pipeline.comparer.model_info(),
        analyzed_at: Utc::now().to_rfc3339(),
    }))
}

// ============ GET /health ============

#[derive(Debug, Serialize)]
struct HealthCheck {
    status: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: String,
    checks: BTreeMap<String, HealthCheck>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = BTreeMap::new();
    let mut healthy = true;

    match state.pipeline.store.list("config/").await {
        Ok(_) => {
            checks.insert(
                "storage".to_string(),
                HealthCheck {
                    status: "healthy".to_string(),
                    message: "Storage connection successful".to_string(),
                },
            );
        }
        Err(e) => {
            healthy = false;
            checks.insert(
                "storage".to_string(),
                HealthCheck {
                    status: "unhealthy".to_string(),
                    message: format!("Storage error: {}", e),
                },
            );
        }
    }

    if state.pipeline.comparer.test_connection().await {
        checks.insert(
            "ai".to_string(),
            HealthCheck {
                status: "healthy".to_string(),
                message: "AI service connection successful".to_string(),
            },
        );
    } else {
        healthy = false;
        checks.insert(
            "ai".to_string(),
            HealthCheck {
                status: "unhealthy".to_string(),
                message: "AI service connection failed".to_string(),
            },
        );
    }

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        checks,
    })
}

// ============ GET /config ============

#[derive(Debug, Serialize)]
struct ConfigResponse {
    storage_backend: String,
    ai: crate::models::ModelInfo,
    documents: Vec<DocumentConfig>,
}

async fn handle_config(State(state): State<AppState>) -> Result<Json<ConfigResponse>, AppError> {
    let documents = store::load_documents(state.pipeline.store.as_ref())
        .await
        .map_err(|e| internal(e.to_string()))?
        .map(|file| file.documents)
        .unwrap_or_default();

    Ok(Json(ConfigResponse {
        storage_backend: state.config.storage.backend.clone(),
        ai: state.pipeline.comparer.model_info(),
        documents,
    }))
}
