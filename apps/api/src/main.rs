//! Runguard API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod dto;
mod error;
mod handlers;
mod state;

use runguard_core::AppError;
use tracing::info;

use crate::api_config::{ApiConfig, RunHistoryBackend, init_tracing};
use crate::api_services::{
    build_app_state, connect_and_migrate, load_rule_set, spawn_run_history_maintenance,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;

    let pool = match &config.run_history_backend {
        RunHistoryBackend::Postgres { database_url } => {
            Some(connect_and_migrate(database_url).await?)
        }
        RunHistoryBackend::Memory => None,
    };

    if config.migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let rule_set = load_rule_set(&config.rules_file).await?;
    if rule_set.is_empty() {
        info!("no rate limit rules active, every run will be admitted");
    }

    let app_state = build_app_state(&config, pool, rule_set);
    let _maintenance = spawn_run_history_maintenance(
        app_state.admission_service.clone(),
        config.orphan_sweep_interval,
        config.orphan_run_max_age,
        config.finished_run_retention,
    );
    let app = api_router::build_router(app_state);

    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(
        %address,
        run_history_backend = config.run_history_backend.name(),
        fail_open = config.fail_open,
        "runguard-api listening"
    );

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))
}
