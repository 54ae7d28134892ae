//! Audit log routes
//!
//! `GET /audit?actor=&action=&job_id=&page=&per_page=`, operator only.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use super::shared::{Actor, PaginationMetadata, PaginationParams};
use crate::api::response::{ApiResponse, ApiResult, AppError};
use crate::api::AppState;
use crate::audit::{AuditAction, AuditQuery};

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub job_id: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub fn audit_routes() -> Router<AppState> {
    Router::new().route("/audit", get(query_audit))
}

async fn query_audit(
    State(state): State<AppState>,
    Actor(_operator): Actor,
    Query(params): Query<AuditParams>,
) -> ApiResult<Response> {
    let action = params
        .action
        .as_deref()
        .map(str::parse::<AuditAction>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let pagination = PaginationParams::new(params.page, params.per_page);
    let query = AuditQuery {
        actor: params.actor,
        action,
        target_job_id: params.job_id,
        limit: pagination.per_page(),
        offset: pagination.offset(),
    };

    let (entries, total) = state.admin.query_audit(&query).await?;
    let meta = PaginationMetadata::from_params(&pagination, total);
    Ok(ApiResponse::success_with_meta(entries, meta.to_meta()).into_response())
}
