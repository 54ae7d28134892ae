//! Job routes
//!
//! - `GET /jobs` lists jobs with their latest run
//! - `POST /jobs/:job_id/toggle` enables or disables a job
//! - `POST /jobs/:job_id/run` starts a run now (202 Accepted)
//! - `GET /jobs/:job_id/runs` pages through a job's run history

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::shared::{Actor, PaginationMetadata, PaginationParams};
use crate::admin::RunNowRequest;
use crate::api::response::{ApiResponse, ApiResult, AppError};
use crate::api::AppState;
use crate::audit::AuditAction;

#[derive(Debug, Deserialize)]
pub struct ToggleBody {
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunBody {
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
}

pub fn jobs_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id/toggle", post(toggle_job))
        .route("/jobs/:job_id/run", post(run_job))
        .route("/jobs/:job_id/runs", get(list_runs))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Response> {
    let jobs = state.admin.list_jobs().await?;
    Ok(ApiResponse::success(jobs).into_response())
}

async fn toggle_job(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(job_id): Path<String>,
    body: Result<Json<ToggleBody>, JsonRejection>,
) -> ApiResult<Response> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let err = state
                .admin
                .reject_malformed(&actor, AuditAction::ToggleJob, &job_id, rejection.body_text())
                .await;
            return Err(err.into());
        },
    };
    let job = state.admin.toggle_job(&actor, &job_id, body.enabled).await?;
    Ok(ApiResponse::success(job).into_response())
}

/// The body is optional; an empty body runs with the job's defaults. A body
/// that does not decode is audited as `rejected:invalid`.
async fn run_job(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(job_id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let body: RunBody = if body.iter().all(u8::is_ascii_whitespace) {
        RunBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                let err = state
                    .admin
                    .reject_malformed(&actor, AuditAction::RunNow, &job_id, e.to_string())
                    .await;
                return Err(err.into());
            },
        }
    };

    let run_id = state
        .admin
        .run_now(
            &actor,
            &job_id,
            RunNowRequest {
                scope: body.scope,
                since: body.since,
            },
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({ "run_id": run_id }))),
    )
        .into_response())
}

async fn list_runs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Response> {
    let (runs, total) = state
        .admin
        .list_runs(&job_id, params.per_page(), params.offset())
        .await?;
    let meta = PaginationMetadata::from_params(&params, total);
    Ok(ApiResponse::success_with_meta(runs, meta.to_meta()).into_response())
}
