//! Axum router construction.

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/file",
            get(handlers::list_files).post(handlers::upload_file),
        )
        .route(
            "/api/file/",
            get(handlers::list_files).post(handlers::upload_file),
        )
        .route("/api/file/*name", get(handlers::download_file))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(state.max_upload_size))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .with_state(state)
}
