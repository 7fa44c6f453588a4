use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use runguard_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;
use crate::time_limit::TimeLimit;

/// Opaque tag naming one run request attribute used to partition history.
///
/// Tags are lowercase ASCII identifiers; the surrounding system decides which
/// tags exist and how they resolve to request values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeDimension(String);

impl ScopeDimension {
    /// Authenticated identity that requested the run.
    pub const REQUESTING_USER: &'static str = "requesting_user";
    /// Path of the pipeline being executed.
    pub const PIPELINE_PATH: &'static str = "pipeline_path";
    /// Network address the request came from.
    pub const CLIENT_IP: &'static str = "client_ip";

    /// Creates a validated scope dimension tag.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let is_valid = !value.is_empty()
            && value
                .bytes()
                .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_');

        if !is_valid {
            return Err(AppError::Configuration(format!(
                "scope dimension must match [a-z0-9_]+, got '{value}'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for ScopeDimension {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeDimension> for String {
    fn from(value: ScopeDimension) -> Self {
        value.0
    }
}

impl Display for ScopeDimension {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Threshold that caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    /// Sum of bytes processed by matching runs.
    ByteLimit,
    /// Number of matching runs started in the window.
    RunLimit,
    /// Number of matching runs still in flight.
    ConcurrencyLimit,
}

impl ThresholdKind {
    /// Returns stable threshold kind value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ByteLimit => "byte_limit",
            Self::RunLimit => "run_limit",
            Self::ConcurrencyLimit => "concurrency_limit",
        }
    }
}

impl Display for ThresholdKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Immutable admission policy for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    name: NonEmptyString,
    scope: Vec<ScopeDimension>,
    time_limit: TimeLimit,
    byte_limit: Option<Quantity>,
    run_limit: Option<Quantity>,
    concurrency_limit: Option<NonZeroU32>,
}

/// Input payload used to construct a validated rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRuleInput {
    /// Rule identifier reported on rejection.
    pub name: String,
    /// Ordered scope dimension tags.
    pub scope: Vec<String>,
    /// ISO-8601 trailing window.
    pub time_limit: String,
    /// Optional byte magnitude such as `10M`.
    pub byte_limit: Option<String>,
    /// Optional run count magnitude such as `100` or `1K`.
    pub run_limit: Option<String>,
    /// Concurrent run cap; zero disables the cap.
    pub concurrency_limit: u32,
}

impl RateLimitRule {
    /// Creates a validated rule, taking ownership of the scope list.
    pub fn new(input: RateLimitRuleInput) -> AppResult<Self> {
        let RateLimitRuleInput {
            name,
            scope,
            time_limit,
            byte_limit,
            run_limit,
            concurrency_limit,
        } = input;

        let name = NonEmptyString::new(name).map_err(|_| {
            AppError::Configuration("rate limit rule name must not be empty".to_owned())
        })?;

        if scope.is_empty() {
            return Err(AppError::Configuration(format!(
                "rate limit rule '{name}' requires at least one scope dimension"
            )));
        }

        let mut seen = HashSet::with_capacity(scope.len());
        let scope = scope
            .into_iter()
            .map(|value| {
                let dimension = ScopeDimension::new(value)?;
                if !seen.insert(dimension.clone()) {
                    return Err(AppError::Configuration(format!(
                        "rate limit rule '{name}' lists scope dimension '{dimension}' more than once"
                    )));
                }
                Ok(dimension)
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            time_limit: TimeLimit::parse("timeLimit", time_limit.as_str())?,
            byte_limit: Quantity::parse_optional("byteLimit", byte_limit.as_deref())?,
            run_limit: Quantity::parse_optional("runLimit", run_limit.as_deref())?,
            concurrency_limit: NonZeroU32::new(concurrency_limit),
            name,
            scope,
        })
    }

    /// Returns the rule identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns ordered scope dimensions.
    #[must_use]
    pub fn scope(&self) -> &[ScopeDimension] {
        &self.scope
    }

    /// Returns the trailing window.
    #[must_use]
    pub fn time_limit(&self) -> &TimeLimit {
        &self.time_limit
    }

    /// Returns the byte limit configuration text, if any.
    #[must_use]
    pub fn byte_limit_text(&self) -> Option<&str> {
        self.byte_limit.as_ref().map(Quantity::as_str)
    }

    /// Returns the parsed byte limit, if any.
    #[must_use]
    pub fn byte_limit(&self) -> Option<u64> {
        self.byte_limit.as_ref().map(Quantity::value)
    }

    /// Returns the run limit configuration text, if any.
    #[must_use]
    pub fn run_limit_text(&self) -> Option<&str> {
        self.run_limit.as_ref().map(Quantity::as_str)
    }

    /// Returns the parsed run limit, if any.
    #[must_use]
    pub fn run_limit(&self) -> Option<u64> {
        self.run_limit.as_ref().map(Quantity::value)
    }

    /// Returns the concurrency cap; zero in configuration means no cap.
    #[must_use]
    pub fn concurrency_limit(&self) -> Option<NonZeroU32> {
        self.concurrency_limit
    }

    /// Returns whether the rule can reject anything at all.
    #[must_use]
    pub fn has_limits(&self) -> bool {
        self.byte_limit.is_some() || self.run_limit.is_some() || self.concurrency_limit.is_some()
    }
}
