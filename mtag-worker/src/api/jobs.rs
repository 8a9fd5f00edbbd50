//! Job review handlers
//!
//! GET /api/stats, GET /api/queues/:view, GET /api/jobs/:id,
//! POST /api/jobs/:id/{approve,reject,retry}, POST /api/bulk-{approve,reject}

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{JobPage, ListView, QueueStats};
use crate::error::{ApiError, ApiResult};
use crate::models::{Job, JobId};
use crate::AppState;

/// Page size when the request does not give one
pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Single-job action response
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
    pub job_id: JobId,
}

/// Bulk action request
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    #[serde(default)]
    pub job_ids: Vec<JobId>,
}

/// Bulk action response
#[derive(Debug, Serialize, Deserialize)]
pub struct BulkResponse {
    pub status: String,
    pub count: usize,
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.store.queue_stats().await?))
}

/// GET /api/queues/:view
pub async fn list_queue(
    State(state): State<AppState>,
    Path(view): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<JobPage>> {
    let view: ListView = view.parse()?;
    let page = state
        .store
        .list(
            view,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(DEFAULT_PER_PAGE),
        )
        .await?;
    Ok(Json(page))
}

/// GET /api/jobs/:id
pub async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Job>> {
    state
        .store
        .get(JobId(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", id)))
}

/// POST /api/jobs/:id/approve
pub async fn approve(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ActionResponse>> {
    state.producer.approve(JobId(id)).await?;
    Ok(action("approved", id))
}

/// POST /api/jobs/:id/reject
pub async fn reject(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ActionResponse>> {
    state.producer.reject(JobId(id)).await?;
    Ok(action("rejected", id))
}

/// POST /api/jobs/:id/retry
pub async fn retry(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ActionResponse>> {
    state.producer.retry(JobId(id)).await?;
    Ok(action("retried", id))
}

/// POST /api/bulk-approve
pub async fn bulk_approve(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> ApiResult<Json<BulkResponse>> {
    let count = state.producer.approve_many(&request.job_ids).await?;
    Ok(Json(BulkResponse {
        status: "approved".to_string(),
        count,
    }))
}

/// POST /api/bulk-reject
pub async fn bulk_reject(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> ApiResult<Json<BulkResponse>> {
    let count = state.producer.reject_many(&request.job_ids).await?;
    Ok(Json(BulkResponse {
        status: "rejected".to_string(),
        count,
    }))
}

fn action(status: &str, id: i64) -> Json<ActionResponse> {
    Json(ActionResponse {
        status: status.to_string(),
        job_id: JobId(id),
    })
}

/// Build job review routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/queues/:view", get(list_queue))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/approve", post(approve))
        .route("/api/jobs/:id/reject", post(reject))
        .route("/api/jobs/:id/retry", post(retry))
        .route("/api/bulk-approve", post(bulk_approve))
        .route("/api/bulk-reject", post(bulk_reject))
}
