//! Artifact serving routes (root level, not under `/api`).

use atelier_core::naming::{LOCAL_ROUTE_PREFIX, REMOTE_ROUTE_PREFIX};
use axum::routing::get;
use axum::Router;

use crate::handlers::artifacts;
use crate::state::AppState;

/// ```text
/// GET    /local/{filename}        -> get_local
/// GET    /remote/{id}             -> get_remote
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            &format!("{LOCAL_ROUTE_PREFIX}/{{filename}}"),
            get(artifacts::get_local),
        )
        .route(
            &format!("{REMOTE_ROUTE_PREFIX}/{{id}}"),
            get(artifacts::get_remote),
        )
}
