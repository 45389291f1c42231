//! Render job routes: submit, poll, list.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::error_response;
use crate::state::AppState;
use opencine_core::JobStatus;
use opencine_runtime::{enqueue, job_status, RenderRequest};
use opencine_store::RenderJob;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/renders", post(create_render).get(list_renders))
        .route("/renders/{job_id}", get(get_render))
}

/// Client-facing view of a job.
#[derive(Debug, Serialize)]
struct RenderStatusView {
    job_id: String,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<RenderJob> for RenderStatusView {
    fn from(job: RenderJob) -> Self {
        Self {
            job_id: job.task_id,
            status: job.status,
            output_url: job.output_url,
            error: job.error,
        }
    }
}

/// POST /v1/renders: queue a render and acknowledge immediately.
async fn create_render(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderRequest>,
) -> impl IntoResponse {
    let job = match enqueue(state.store.as_ref(), &request, state.config.min_prompt_chars) {
        Ok(job) => job,
        Err(e) => return error_response(&e),
    };

    if !state.dispatch(&job.task_id) {
        error!("Render worker unavailable, failing job {}", job.task_id);
        let _ = state.store.mark_failed(&job.task_id, "render worker unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "render worker unavailable" })),
        );
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "job_id": job.task_id,
            "status": job.status,
        })),
    )
}

/// GET /v1/renders/{job_id}: current status of one job.
async fn get_render(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match job_status(state.store.as_ref(), &job_id) {
        Ok(job) => (
            StatusCode::OK,
            Json(serde_json::json!(RenderStatusView::from(job))),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

/// GET /v1/renders: most recent jobs first.
async fn list_renders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    match state.store.list_recent(limit) {
        Ok(jobs) => {
            let jobs: Vec<RenderStatusView> = jobs.into_iter().map(Into::into).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "jobs": jobs,
                    "total": jobs.len(),
                })),
            )
        }
        Err(e) => error_response(&e),
    }
}
