//! Declarative rate limit configuration.
//!
//! Rules are loaded once at startup (or reload) from a JSON document:
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "name": "user-path",
//!       "scope": ["requesting_user", "pipeline_path"],
//!       "timeLimit": "PT10M",
//!       "byteLimit": "10M",
//!       "runLimit": "100",
//!       "concurrencyLimit": 5
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use runguard_core::{AppError, AppResult};
use runguard_domain::{RateLimitRule, RateLimitRuleInput, ScopeDimension};

/// Raw configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitingConfig {
    #[serde(default)]
    rules: Vec<RateLimitRuleConfig>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

/// Raw configuration for one rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitRuleConfig {
    #[serde(default)]
    name: Option<String>,
    scope: Vec<String>,
    time_limit: String,
    #[serde(default)]
    byte_limit: Option<QuantityText>,
    #[serde(default)]
    run_limit: Option<QuantityText>,
    #[serde(default)]
    concurrency_limit: u32,
}

/// Magnitudes may be written as strings (`"10M"`) or bare integers (`100`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum QuantityText {
    Text(String),
    Number(u64),
}

impl QuantityText {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(value) => value.to_string(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Validated, immutable set of rules evaluated for every run request.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<RateLimitRule>>,
}

impl RuleSet {
    /// Creates a rule set, rejecting duplicate rule names.
    pub fn new(rules: Vec<RateLimitRule>) -> AppResult<Self> {
        let mut names = HashSet::with_capacity(rules.len());
        for rule in &rules {
            if !names.insert(rule.name().to_owned()) {
                return Err(AppError::Configuration(format!(
                    "rate limit rule name '{}' is defined more than once",
                    rule.name()
                )));
            }
        }

        Ok(Self {
            rules: rules.into_iter().map(Arc::new).collect(),
        })
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(text: &str) -> AppResult<Self> {
        let config = serde_json::from_str::<RateLimitingConfig>(text).map_err(|error| {
            AppError::Configuration(format!("invalid rate limit configuration: {error}"))
        })?;

        Self::from_config(config)
    }

    /// Validates a deserialized configuration document.
    pub fn from_config(config: RateLimitingConfig) -> AppResult<Self> {
        let enabled = config.enabled;
        let rules = config
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| {
                RateLimitRule::new(RateLimitRuleInput {
                    name: rule.name.unwrap_or_else(|| format!("rule-{}", index + 1)),
                    scope: rule.scope,
                    time_limit: rule.time_limit,
                    byte_limit: rule.byte_limit.map(QuantityText::into_text),
                    run_limit: rule.run_limit.map(QuantityText::into_text),
                    concurrency_limit: rule.concurrency_limit,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        let rule_set = Self::new(rules)?;

        // Disabled configurations are still validated.
        if !enabled {
            return Ok(Self::default());
        }

        Ok(rule_set)
    }

    /// Returns rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Arc<RateLimitRule>] {
        &self.rules
    }

    /// Returns whether no rule is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns a serializable description of every rule.
    #[must_use]
    pub fn summaries(&self) -> Vec<RateLimitRuleSummary> {
        self.rules
            .iter()
            .map(|rule| RateLimitRuleSummary {
                name: rule.name().to_owned(),
                scope: rule
                    .scope()
                    .iter()
                    .map(ScopeDimension::as_str)
                    .map(ToOwned::to_owned)
                    .collect(),
                time_limit: rule.time_limit().as_str().to_owned(),
                byte_limit: rule.byte_limit_text().map(ToOwned::to_owned),
                run_limit: rule.run_limit_text().map(ToOwned::to_owned),
                concurrency_limit: rule.concurrency_limit().map_or(0, |limit| limit.get()),
            })
            .collect()
    }
}

/// Normalized view of one configured rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRuleSummary {
    /// Rule identifier.
    pub name: String,
    /// Ordered scope dimensions.
    pub scope: Vec<String>,
    /// Normalized ISO-8601 window.
    pub time_limit: String,
    /// Normalized byte limit text.
    pub byte_limit: Option<String>,
    /// Normalized run limit text.
    pub run_limit: Option<String>,
    /// Concurrency cap, zero when uncapped.
    pub concurrency_limit: u32,
}

#[cfg(test)]
mod tests {
    use runguard_core::AppError;

    use super::RuleSet;

    #[test]
    fn parses_declarative_rules() {
        let rule_set = RuleSet::from_json(
            r#"{
                "rules": [
                    {
                        "name": "user-path",
                        "scope": ["requesting_user", "pipeline_path"],
                        "timeLimit": "PT10M",
                        "byteLimit": "10m",
                        "concurrencyLimit": 5
                    },
                    {
                        "scope": ["client_ip"],
                        "timeLimit": "PT1H",
                        "runLimit": 100
                    }
                ]
            }"#,
        );

        let Ok(rule_set) = rule_set else {
            panic!("configuration should be valid");
        };

        let summaries = rule_set.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "user-path");
        assert_eq!(summaries[0].byte_limit.as_deref(), Some("10M"));
        assert_eq!(summaries[0].concurrency_limit, 5);
        assert_eq!(summaries[1].name, "rule-2");
        assert_eq!(summaries[1].run_limit.as_deref(), Some("100"));
        assert_eq!(rule_set.rules()[1].run_limit(), Some(100));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let unknown_key = RuleSet::from_json(
            r#"{"rules":[{"scope":["client_ip"],"timeLimit":"PT1M","burst":3}]}"#,
        );
        assert!(matches!(unknown_key, Err(AppError::Configuration(_))));

        let bad_quantity = RuleSet::from_json(
            r#"{"rules":[{"scope":["client_ip"],"timeLimit":"PT1M","byteLimit":"-5"}]}"#,
        );
        assert!(matches!(bad_quantity, Err(AppError::Configuration(ref message)) if message.contains("byteLimit")));

        let empty_scope = RuleSet::from_json(r#"{"rules":[{"scope":[],"timeLimit":"PT1M"}]}"#);
        assert!(matches!(empty_scope, Err(AppError::Configuration(_))));
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let rule_set = RuleSet::from_json(
            r#"{"rules":[
                {"name":"a","scope":["client_ip"],"timeLimit":"PT1M"},
                {"name":"a","scope":["requesting_user"],"timeLimit":"PT1M"}
            ]}"#,
        );
        assert!(matches!(rule_set, Err(AppError::Configuration(ref message)) if message.contains("more than once")));
    }

    #[test]
    fn disabled_configuration_yields_empty_rule_set() {
        let rule_set = RuleSet::from_json(
            r#"{"enabled":false,"rules":[{"scope":["client_ip"],"timeLimit":"PT1M","runLimit":"1"}]}"#,
        );
        assert!(matches!(rule_set, Ok(ref rules) if rules.is_empty()));
    }
}
