//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod quantity;
mod rate_limit;
mod run;
mod scope;
mod time_limit;

pub use quantity::{Quantity, parse_quantity};
pub use rate_limit::{RateLimitRule, RateLimitRuleInput, ScopeDimension, ThresholdKind};
pub use run::{RunId, RunRecord, RunStatus};
pub use scope::{RunRequestAttributes, ScopeKey, UNKNOWN_SCOPE_VALUE};
pub use time_limit::TimeLimit;
