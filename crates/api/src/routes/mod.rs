pub mod artifacts;
pub mod health;
pub mod jobs;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generate                                        submit to all backends (POST)
/// /status?jobId=&backendIndex=&action=             poll or retrieve (GET)
///
/// /jobs                                            list job records
/// /jobs/{backend_index}/{job_id}                   get, cancel
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::generate::generate))
        .route("/status", get(handlers::status::get_status))
        .nest("/jobs", jobs::router())
}
