use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/v1/openapi.json", ApiDoc::openapi()))
        // Control endpoints
        .route("/api/v1/start", post(start_scheduler))
        .route("/api/v1/stop", post(stop_scheduler))
        .route("/api/v1/restart", post(restart_scheduler))
        // Status endpoints
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/cycles", get(get_cycles))
        .route("/api/v1/symbols", get(get_symbols))
        .with_state(state)
}
