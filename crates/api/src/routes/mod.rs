pub mod health;
pub mod notifications;
pub mod templates;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let max_archive_bytes = state.config.max_archive_bytes;
    Router::new()
        .merge(health::router())
        .merge(templates::router(max_archive_bytes))
        .merge(notifications::router())
        .with_state(state)
}
