pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod routes;
pub mod services;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;

/// Shared application state passed to all Axum handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: config::AppConfig,
}

/// Build the full application router. Shared by `main` and integration tests.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .route(
            "/api/v1/projects/{project_id}/alerts/notify",
            post(routes::alerts::notify),
        )
        .route(
            "/api/v1/projects/{project_id}/pipelines/{pipeline_id}/reports",
            post(routes::reports::store),
        )
        .route(
            "/api/v1/projects/{project_id}/pipelines/{pipeline_id}/auto_fix",
            post(routes::reports::auto_fix),
        )
        .route(
            "/api/v1/pipelines/{pipeline_id}/findings",
            get(routes::findings::list),
        )
        .route(
            "/api/v1/projects/{project_id}/feedback",
            post(routes::feedback::create).get(routes::feedback::list),
        )
        .route(
            "/api/v1/projects/{project_id}/vulnerabilities",
            get(routes::vulnerabilities::list),
        )
        .route(
            "/api/v1/projects/{project_id}/vulnerabilities/{vulnerability_id}",
            get(routes::vulnerabilities::get),
        )
        .route(
            "/api/v1/projects/{project_id}/vulnerabilities/{vulnerability_id}/state",
            post(routes::vulnerabilities::transition),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
