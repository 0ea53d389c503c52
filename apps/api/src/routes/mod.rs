pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::flows::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // Generic flow API
        .route("/api/v1/flows", get(handlers::handle_list_flows))
        .route("/api/v1/flows/:name/run", post(handlers::handle_run_flow))
        // Typed flow endpoints used by the portfolio pages
        .route(
            "/api/v1/code-assistant/suggestions",
            post(handlers::handle_code_suggestions),
        )
        .route(
            "/api/v1/cognova/interact",
            post(handlers::handle_cognova_interact),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
