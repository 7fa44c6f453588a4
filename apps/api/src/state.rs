use std::path::PathBuf;
use std::sync::Arc;

use runguard_application::AdmissionService;
use sqlx::PgPool;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub admission_service: AdmissionService,
    pub rules_file: Arc<PathBuf>,
    pub fail_open: bool,
    pub run_history_backend: &'static str,
    pub postgres_pool: Option<PgPool>,
}
