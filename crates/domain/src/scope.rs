use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::rate_limit::{RateLimitRule, ScopeDimension};

/// Value a scope dimension resolves to when the request does not carry it.
///
/// Requests missing an attribute share this bucket instead of escaping the
/// limit or failing the derivation.
pub const UNKNOWN_SCOPE_VALUE: &str = "<unknown>";

/// Attributes describing one run request, keyed by scope dimension tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunRequestAttributes(BTreeMap<String, String>);

impl RunRequestAttributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one attribute, replacing any previous value.
    #[must_use]
    pub fn with(mut self, dimension: &str, value: impl Into<String>) -> Self {
        self.insert(dimension, value);
        self
    }

    /// Sets one attribute, replacing any previous value.
    pub fn insert(&mut self, dimension: &str, value: impl Into<String>) {
        self.0.insert(dimension.to_owned(), value.into());
    }

    /// Returns the raw attribute value.
    #[must_use]
    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.0.get(dimension).map(String::as_str)
    }

    /// Returns the value used for scope matching, falling back to the
    /// unknown placeholder for absent or blank attributes.
    #[must_use]
    pub fn resolve(&self, dimension: &ScopeDimension) -> &str {
        self.get(dimension.as_str())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(UNKNOWN_SCOPE_VALUE)
    }

}

/// Concrete bucket a request falls into for one rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ScopeKey {
    pairs: Vec<(ScopeDimension, String)>,
}

impl ScopeKey {
    /// Derives the key of `attributes` under the rule's ordered scope.
    #[must_use]
    pub fn derive(rule: &RateLimitRule, attributes: &RunRequestAttributes) -> Self {
        Self::from_dimensions(rule.scope(), attributes)
    }

    /// Derives a key from an explicit dimension list.
    #[must_use]
    pub fn from_dimensions(
        dimensions: &[ScopeDimension],
        attributes: &RunRequestAttributes,
    ) -> Self {
        let pairs = dimensions
            .iter()
            .map(|dimension| (dimension.clone(), attributes.resolve(dimension).to_owned()))
            .collect();

        Self { pairs }
    }

    /// Returns whether a stored run with `attributes` belongs to this key.
    #[must_use]
    pub fn matches(&self, attributes: &RunRequestAttributes) -> bool {
        self.pairs
            .iter()
            .all(|(dimension, value)| attributes.resolve(dimension) == value)
    }

    /// Returns the ordered dimension/value pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(ScopeDimension, String)] {
        &self.pairs
    }

    /// Returns whether any dimension fell back to the unknown placeholder.
    #[must_use]
    pub fn has_unknown(&self) -> bool {
        self.pairs
            .iter()
            .any(|(_, value)| value == UNKNOWN_SCOPE_VALUE)
    }
}

impl Display for ScopeKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, (dimension, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                formatter.write_str("|")?;
            }
            write!(formatter, "{dimension}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::rate_limit::{RateLimitRule, RateLimitRuleInput};

    use super::{RunRequestAttributes, ScopeKey, UNKNOWN_SCOPE_VALUE};

    fn rule(scope: &[&str]) -> RateLimitRule {
        let rule = RateLimitRule::new(RateLimitRuleInput {
            name: "scoped".to_owned(),
            scope: scope.iter().map(|value| (*value).to_owned()).collect(),
            time_limit: "PT10M".to_owned(),
            byte_limit: None,
            run_limit: Some("3".to_owned()),
            concurrency_limit: 0,
        });
        match rule {
            Ok(rule) => rule,
            Err(error) => panic!("test rule should be valid: {error}"),
        }
    }

    #[test]
    fn derivation_is_deterministic_and_ordered() {
        let rule = rule(&["requesting_user", "pipeline_path"]);
        let attributes = RunRequestAttributes::new()
            .with("pipeline_path", "/etl/daily")
            .with("requesting_user", "alice")
            .with("client_ip", "10.0.0.1");

        let first = ScopeKey::derive(&rule, &attributes);
        let second = ScopeKey::derive(&rule, &attributes);

        assert_eq!(first, second);
        assert_eq!(
            first.to_string(),
            "requesting_user=alice|pipeline_path=/etl/daily"
        );
    }

    #[test]
    fn keys_differ_when_any_dimension_differs() {
        let rule = rule(&["requesting_user", "pipeline_path"]);
        let alice = RunRequestAttributes::new()
            .with("requesting_user", "alice")
            .with("pipeline_path", "/etl");
        let bob = alice.clone().with("requesting_user", "bob");

        assert_ne!(ScopeKey::derive(&rule, &alice), ScopeKey::derive(&rule, &bob));
    }

    #[test]
    fn missing_attributes_resolve_to_unknown_bucket() {
        let rule = rule(&["requesting_user", "pipeline_path"]);
        let attributes = RunRequestAttributes::new()
            .with("pipeline_path", "/etl")
            .with("requesting_user", "  ");

        let key = ScopeKey::derive(&rule, &attributes);

        assert!(key.has_unknown());
        assert_eq!(key.pairs()[0].1, UNKNOWN_SCOPE_VALUE);
        assert!(key.matches(&RunRequestAttributes::new().with("pipeline_path", "/etl")));
    }

    #[test]
    fn matching_ignores_unrelated_attributes() {
        let rule = rule(&["requesting_user"]);
        let key = ScopeKey::derive(
            &rule,
            &RunRequestAttributes::new().with("requesting_user", "alice"),
        );

        let stored = RunRequestAttributes::new()
            .with("requesting_user", "alice")
            .with("pipeline_path", "/other");

        assert!(key.matches(&stored));
        assert!(!key.matches(&RunRequestAttributes::new().with("requesting_user", "bob")));
    }
}
