//! HTTP API.
//!
//! A thin axum adapter over [`KnowledgeService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/content/submit` | Queue content processing |
//! | `GET`  | `/api/content/task/{task_id}` | Content task status |
//! | `GET`  | `/api/content/{task_id}` | Processed content of a completed task |
//! | `POST` | `/api/tutorial/generate` | Queue tutorial generation |
//! | `GET`  | `/api/tutorial/status/{task_id}` | Tutorial task status |
//! | `GET`  | `/api/tutorial/content/{tutorial_id}` | Stored tutorial |
//! | `POST` | `/api/tutorial/validate` | Run the section validators |
//! | `GET`  | `/api/search/single` | Search one collection |
//! | `GET`  | `/api/search/multi` | Search several collections |
//! | `GET`  | `/api/search/similar/{content_id}` | Records similar to a stored one |
//! | `GET`  | `/api/search/collections` | Collections overview |
//! | `GET`  | `/api/search/collections/{collection}` | Collection listing |
//! | `GET`/`DELETE` | `/api/search/content/{collection}/{content_id}` | Content detail / delete |
//! | `GET`  | `/api/search/content/{collection}/by-url` | Content id for a source URL |
//! | `GET`  | `/health` | Version and task counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! `Validation` → 400, `NotFound` → 404, `TaskNotReady` → 409,
//! `Overloaded` → 503, anything else → 500.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use knowledge_harness_core::models::{ContentType, ProcessedContent, SearchHit, TutorialArtifact};
use knowledge_harness_core::store::CollectionInfo;
use knowledge_harness_core::Error;

use crate::config::{Config, ServerConfig};
use crate::service::{
    CollectionPage, ContentTaskStatus, Health, KnowledgeService, TaskReceipt, TutorialTaskStatus,
    ValidationReport,
};

type AppState = Arc<KnowledgeService>;

/// Build the router over `service`.
pub fn router(service: Arc<KnowledgeService>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/api/content/submit", post(handle_submit_content))
        .route("/api/content/task/{task_id}", get(handle_content_status))
        .route("/api/content/{task_id}", get(handle_processed_content))
        .route("/api/tutorial/generate", post(handle_generate_tutorial))
        .route("/api/tutorial/status/{task_id}", get(handle_tutorial_status))
        .route("/api/tutorial/content/{tutorial_id}", get(handle_get_tutorial))
        .route("/api/tutorial/validate", post(handle_validate_tutorial))
        .route("/api/search/single", get(handle_search_single))
        .route("/api/search/multi", get(handle_search_multi))
        .route("/api/search/similar/{content_id}", get(handle_similar))
        .route("/api/search/collections", get(handle_collections))
        .route("/api/search/collections/{collection}", get(handle_list_collection))
        .route(
            "/api/search/content/{collection}/by-url",
            get(handle_find_by_url),
        )
        .route(
            "/api/search/content/{collection}/{content_id}",
            get(handle_get_content).delete(handle_delete_content),
        )
        .route("/health", get(handle_health))
        .layer(cors_layer(&server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Start the server on `config.server.bind` and run until Ctrl-C, then
/// drain the worker queue.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(KnowledgeService::from_config(config).await?);
    let app = router(service.clone(), &config.server);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("shutting down, draining queued jobs");
    service.shutdown().await;
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

/// Wraps a service error for conversion into an HTTP response.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::TaskNotReady { .. } => StatusCode::CONFLICT,
        Error::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_content_type(raw: &str) -> Result<ContentType, ApiError> {
    Ok(raw.parse::<ContentType>()?)
}

// ============ Content ============

#[derive(Deserialize)]
struct SubmitContentRequest {
    url: String,
    content_type: String,
}

async fn handle_submit_content(
    State(service): State<AppState>,
    Json(req): Json<SubmitContentRequest>,
) -> ApiResult<TaskReceipt> {
    let content_type = parse_content_type(&req.content_type)?;
    Ok(Json(service.submit_content(&req.url, content_type)?))
}

async fn handle_content_status(
    State(service): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<ContentTaskStatus> {
    Ok(Json(service.get_task_status(&task_id)?))
}

async fn handle_processed_content(
    State(service): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<ProcessedContent> {
    Ok(Json(service.get_processed_content(&task_id)?))
}

// ============ Tutorials ============

#[derive(Deserialize)]
struct GenerateTutorialRequest {
    content_id: String,
    content_type: String,
}

async fn handle_generate_tutorial(
    State(service): State<AppState>,
    Json(req): Json<GenerateTutorialRequest>,
) -> ApiResult<TaskReceipt> {
    let content_type = parse_content_type(&req.content_type)?;
    Ok(Json(service.generate_tutorial(&req.content_id, content_type)?))
}

async fn handle_tutorial_status(
    State(service): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TutorialTaskStatus> {
    Ok(Json(service.get_tutorial_status(&task_id)?))
}

async fn handle_get_tutorial(
    State(service): State<AppState>,
    Path(tutorial_id): Path<String>,
) -> ApiResult<TutorialArtifact> {
    Ok(Json(service.get_tutorial_by_id(&tutorial_id).await?))
}

async fn handle_validate_tutorial(
    State(service): State<AppState>,
    Json(tutorial): Json<Value>,
) -> ApiResult<ValidationReport> {
    Ok(Json(service.validate_tutorial(&tutorial)))
}

// ============ Search ============

#[derive(Deserialize)]
struct SingleSearchParams {
    query: String,
    collection: String,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HitsResponse {
    results: Vec<SearchHit>,
}

async fn handle_search_single(
    State(service): State<AppState>,
    Query(params): Query<SingleSearchParams>,
) -> ApiResult<HitsResponse> {
    let results = service
        .search_single(&params.query, &params.collection, params.limit)
        .await?;
    Ok(Json(HitsResponse { results }))
}

#[derive(Deserialize)]
struct MultiSearchParams {
    query: String,
    /// Comma-separated collection names.
    collections: String,
    limit_per_collection: Option<usize>,
}

async fn handle_search_multi(
    State(service): State<AppState>,
    Query(params): Query<MultiSearchParams>,
) -> ApiResult<BTreeMap<String, Vec<SearchHit>>> {
    let collections: Vec<String> = params
        .collections
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    Ok(Json(
        service
            .search_multi(&params.query, &collections, params.limit_per_collection)
            .await?,
    ))
}

#[derive(Deserialize)]
struct SimilarParams {
    collection: String,
    limit: Option<usize>,
}

async fn handle_similar(
    State(service): State<AppState>,
    Path(content_id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<HitsResponse> {
    let results = service
        .find_similar(&content_id, &params.collection, params.limit)
        .await?;
    Ok(Json(HitsResponse { results }))
}

// ============ Collections ============

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<CollectionInfo>,
}

async fn handle_collections(State(service): State<AppState>) -> ApiResult<CollectionsResponse> {
    Ok(Json(CollectionsResponse {
        collections: service.collections().await?,
    }))
}

#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

async fn handle_list_collection(
    State(service): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<PageParams>,
) -> ApiResult<CollectionPage> {
    Ok(Json(
        service
            .list_collection(&collection, params.offset, params.limit)
            .await?,
    ))
}

async fn handle_get_content(
    State(service): State<AppState>,
    Path((collection, content_id)): Path<(String, String)>,
) -> ApiResult<ProcessedContent> {
    Ok(Json(service.get_content(&collection, &content_id).await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: usize,
}

async fn handle_delete_content(
    State(service): State<AppState>,
    Path((collection, content_id)): Path<(String, String)>,
) -> ApiResult<DeleteResponse> {
    Ok(Json(DeleteResponse {
        deleted: service.delete_content(&collection, &content_id).await?,
    }))
}

#[derive(Deserialize)]
struct ByUrlParams {
    source_url: String,
}

#[derive(Serialize)]
struct ByUrlResponse {
    content_id: Option<String>,
}

async fn handle_find_by_url(
    State(service): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ByUrlParams>,
) -> ApiResult<ByUrlResponse> {
    Ok(Json(ByUrlResponse {
        content_id: service
            .find_by_source_url(&collection, &params.source_url)
            .await?,
    }))
}

// ============ Health ============

async fn handle_health(State(service): State<AppState>) -> Json<Health> {
    Json(service.health())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::not_found("task", "t")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&Error::TaskNotReady {
                task_id: "t".into(),
                status: "processing".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::Overloaded("full".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::storage("disk")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
