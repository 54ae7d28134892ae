//! Service status and configuration routes

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use super::shared::Actor;
use crate::api::response::{ApiResponse, ApiResult};
use crate::api::AppState;

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(service_status))
        .route("/config", get(read_config))
}

async fn service_status(State(state): State<AppState>) -> ApiResult<Response> {
    let status = state.admin.service_status().await?;
    Ok(ApiResponse::success(status).into_response())
}

/// Effective configuration with credentials masked. Audited.
async fn read_config(State(state): State<AppState>, Actor(actor): Actor) -> ApiResult<Response> {
    let config = state.admin.read_config(&actor).await?;
    Ok(ApiResponse::success(config).into_response())
}
