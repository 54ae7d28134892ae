//! Run routes

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::api::response::{ApiResponse, ApiResult, AppError};
use crate::api::AppState;

pub fn runs_routes() -> Router<AppState> {
    Router::new().route("/runs/:run_id", get(get_run))
}

/// GET /runs/:run_id
async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<Response> {
    let run_id: Uuid = run_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("'{run_id}' is not a valid run id")))?;
    let run = state.admin.get_run(run_id).await?;
    Ok(ApiResponse::success(run).into_response())
}
