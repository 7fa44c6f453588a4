use axum::Json;
use axum::extract::State;
use tracing::warn;

use crate::api_services::load_rule_set;
use crate::dto::RateLimitRulesResponse;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_rate_limit_rules_handler(
    State(state): State<AppState>,
) -> Json<RateLimitRulesResponse> {
    Json(RateLimitRulesResponse {
        rules: state.admission_service.rules().await.summaries(),
    })
}

/// Re-reads the rules file. An invalid file leaves the active rules in place.
pub async fn reload_rate_limit_rules_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<RateLimitRulesResponse>> {
    let rule_set = match load_rule_set(state.rules_file.as_path()).await {
        Ok(rule_set) => rule_set,
        Err(error) => {
            warn!(%error, "rate limit rules reload failed, keeping active rules");
            return Err(error.into());
        }
    };

    state.admission_service.replace_rules(rule_set).await;

    Ok(Json(RateLimitRulesResponse {
        rules: state.admission_service.rules().await.summaries(),
    }))
}
