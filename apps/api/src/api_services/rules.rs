use std::path::Path;

use runguard_application::RuleSet;
use runguard_core::{AppError, AppResult};
use tracing::info;

/// Reads and validates the rule configuration file.
pub async fn load_rule_set(path: &Path) -> AppResult<RuleSet> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|error| {
        AppError::Configuration(format!(
            "failed to read rules file '{}': {error}",
            path.display()
        ))
    })?;

    let rule_set = RuleSet::from_json(&contents)?;
    info!(
        path = %path.display(),
        rule_count = rule_set.rules().len(),
        "rate limit rules loaded"
    );

    Ok(rule_set)
}
