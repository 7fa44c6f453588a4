use runguard_application::{RateLimitRuleSummary, Rejection};
use runguard_domain::RunRequestAttributes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub run_history: HealthDependencyStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthDependencyStatus {
    pub backend: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Incoming payload for a run admission check.
#[derive(Debug, Default, Deserialize)]
pub struct AdmissionRequest {
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: RunRequestAttributes,
}

/// Admitted run. `tracked` is false when the run was let through without a
/// reservation because run history was unavailable.
#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    pub run_id: String,
    pub tracked: bool,
}

/// Rejected run payload returned with `429 Too Many Requests`.
#[derive(Debug, Serialize)]
pub struct RejectionResponse {
    pub message: String,
    pub rule: String,
    pub threshold: &'static str,
    pub current_value: u64,
    pub limit_value: u64,
    pub scope_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

impl RejectionResponse {
    pub fn from_rejection(rejection: &Rejection, retry_after_seconds: Option<i64>) -> Self {
        Self {
            message: rejection.to_string(),
            rule: rejection.rule_name.clone(),
            threshold: rejection.threshold.as_str(),
            current_value: rejection.current_value,
            limit_value: rejection.limit_value,
            scope_key: rejection.scope_key.to_string(),
            retry_after_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunProgressRequest {
    pub bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct RunCompletionRequest {
    pub total_bytes: u64,
}

/// Active rate limit rules.
#[derive(Debug, Serialize)]
pub struct RateLimitRulesResponse {
    pub rules: Vec<RateLimitRuleSummary>,
}
