//! Route definitions for the `/jobs` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                                -> list_jobs
/// GET    /{backend_index}/{job_id}        -> get_job
/// DELETE /{backend_index}/{job_id}        -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route(
            "/{backend_index}/{job_id}",
            get(jobs::get_job).delete(jobs::cancel_job),
        )
}
