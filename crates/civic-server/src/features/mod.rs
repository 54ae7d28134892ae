//! Feature modules implementing the control plane API
//!
//! - **jobs**: list, toggle and trigger jobs; job run history
//! - **runs**: single run lookup
//! - **status**: service status and the redacted configuration
//! - **audit**: audit log queries
//!
//! Mutating and operator-only routes require the `x-actor` header.

pub mod audit;
pub mod jobs;
pub mod runs;
pub mod shared;
pub mod status;

use axum::Router;

use crate::api::AppState;

/// Creates the API router with all feature routes mounted
pub fn router(state: AppState) -> Router<()> {
    Router::new()
        .merge(jobs::jobs_routes())
        .merge(runs::runs_routes())
        .merge(status::status_routes())
        .merge(audit::audit_routes())
        .with_state(state)
}
