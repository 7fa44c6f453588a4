use std::sync::Arc;

use runguard_application::{AdmissionService, AdmissionSettings, RunHistoryRepository, RuleSet};
use runguard_infrastructure::{InMemoryRunHistory, PostgresRunHistory};
use sqlx::PgPool;

use crate::api_config::ApiConfig;
use crate::state::AppState;

pub fn build_app_state(config: &ApiConfig, pool: Option<PgPool>, rule_set: RuleSet) -> AppState {
    let run_history: Arc<dyn RunHistoryRepository> = match &pool {
        Some(pool) => Arc::new(PostgresRunHistory::new(pool.clone())),
        None => Arc::new(InMemoryRunHistory::new()),
    };

    let admission_service = AdmissionService::new(
        run_history,
        rule_set,
        AdmissionSettings {
            history_timeout: config.run_history_timeout,
        },
    );

    AppState {
        admission_service,
        rules_file: Arc::new(config.rules_file.clone()),
        fail_open: config.fail_open,
        run_history_backend: config.run_history_backend.name(),
        postgres_pool: pool,
    }
}
