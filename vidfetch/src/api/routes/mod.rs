//! API route modules.
//!
//! Organizes routes by resource type.

pub mod analyze;
pub mod downloads;
pub mod files;
pub mod health;
pub mod logging;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(analyze::router())
        .merge(downloads::router())
        .merge(files::router())
        .merge(logging::router());

    Router::new()
        .nest("/api", api)
        .merge(health::router())
        .with_state(state)
}
