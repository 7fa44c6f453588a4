use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::dto::{HealthDependencyStatus, HealthResponse};
use crate::state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let run_history = match state.postgres_pool.as_ref() {
        Some(pool) => check_postgres(pool, state.run_history_backend).await,
        None => HealthDependencyStatus {
            backend: state.run_history_backend,
            status: "ok",
            detail: None,
        },
    };

    let ready = run_history.status == "ok";
    let http_status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "degraded" },
            run_history,
        }),
    )
}

async fn check_postgres(pool: &sqlx::PgPool, backend: &'static str) -> HealthDependencyStatus {
    let check = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await;

    match check {
        Ok(_) => HealthDependencyStatus {
            backend,
            status: "ok",
            detail: None,
        },
        Err(error) => HealthDependencyStatus {
            backend,
            status: "error",
            detail: Some(format!("postgres check failed: {error}")),
        },
    }
}
