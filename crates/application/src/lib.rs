//! Application services and ports.

#![forbid(unsafe_code)]

mod admission_service;
mod rate_limit_config;
mod run_history_ports;

pub use admission_service::{
    Admission, AdmissionDecision, AdmissionService, AdmissionSettings, Rejection, RunPermit,
    WindowAggregate, aggregate_window, evaluate_window, window_bounds,
};
pub use rate_limit_config::{
    RateLimitRuleConfig, RateLimitRuleSummary, RateLimitingConfig, RuleSet,
};
pub use run_history_ports::{RunHistoryRepository, RunRegistration, RunReservation};
