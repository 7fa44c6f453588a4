use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(app_state: AppState) -> Router {
    let run_routes = Router::new()
        .route(
            "/api/runs/admission",
            post(handlers::runs::admit_run_handler),
        )
        .route(
            "/api/runs/{run_id}/progress",
            post(handlers::runs::record_run_progress_handler),
        )
        .route(
            "/api/runs/{run_id}/complete",
            post(handlers::runs::complete_run_handler),
        )
        .route(
            "/api/runs/{run_id}/release",
            post(handlers::runs::release_run_handler),
        );

    let rate_limit_routes = Router::new()
        .route(
            "/api/rate-limits/rules",
            get(handlers::rate_limits::list_rate_limit_rules_handler),
        )
        .route(
            "/api/rate-limits/reload",
            post(handlers::rate_limits::reload_rate_limit_rules_handler),
        );

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(run_routes)
        .merge(rate_limit_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
