//! Admission control for pipeline runs.
//!
//! Before a run starts, every configured rule measures the bytes, run count
//! and in-flight runs of the request's scope over the rule's trailing window.
//! The run is admitted only when no rule is violated. Evaluate-and-reserve is
//! serialized per scope key so concurrency caps hold under parallel load.

mod evaluation;
mod permit;
mod scope_locks;


use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use runguard_core::{AppError, AppResult};
use runguard_domain::{RateLimitRule, RunId, RunRequestAttributes, ScopeKey};

use crate::rate_limit_config::RuleSet;
use crate::run_history_ports::{RunHistoryRepository, RunRegistration, RunReservation};

pub use evaluation::{
    AdmissionDecision, Rejection, WindowAggregate, aggregate_window, evaluate_window,
    window_bounds,
};
pub use permit::RunPermit;

use scope_locks::ScopeLocks;

/// Tuning for the admission service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSettings {
    /// Upper bound for every run history call.
    pub history_timeout: Duration,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            history_timeout: Duration::from_secs(2),
        }
    }
}

/// Result of an evaluate-and-reserve attempt.
#[derive(Debug)]
pub enum Admission {
    /// The run may start and holds a concurrency slot.
    Admitted(RunPermit),
    /// A rule rejected the run; nothing was reserved.
    Rejected(Rejection),
}

/// Application service deciding whether pipeline runs may start.
#[derive(Clone)]
pub struct AdmissionService {
    history: Arc<dyn RunHistoryRepository>,
    rules: Arc<RwLock<Arc<RuleSet>>>,
    locks: Arc<ScopeLocks>,
    settings: AdmissionSettings,
}

impl AdmissionService {
    /// Creates a new admission service.
    #[must_use]
    pub fn new(
        history: Arc<dyn RunHistoryRepository>,
        rules: RuleSet,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            history,
            rules: Arc::new(RwLock::new(Arc::new(rules))),
            locks: Arc::new(ScopeLocks::default()),
            settings,
        }
    }

    /// Returns the active rule set.
    pub async fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&*self.rules.read().await)
    }

    /// Replaces the active rule set wholesale.
    ///
    /// Evaluations already in progress finish against the previous set.
    pub async fn replace_rules(&self, rules: RuleSet) {
        let rule_count = rules.rules().len();
        *self.rules.write().await = Arc::new(rules);
        info!(rule_count, "rate limit rules replaced");
    }

    /// Decides one rule for a request at `now` without reserving anything.
    pub async fn evaluate_rule(
        &self,
        rule: &RateLimitRule,
        attributes: &RunRequestAttributes,
        now: DateTime<Utc>,
    ) -> AppResult<AdmissionDecision> {
        let key = ScopeKey::derive(rule, attributes);
        self.evaluate_keyed(rule, &key, now).await
    }

    /// Decides every active rule for a request, stopping at the first
    /// rejection. Nothing is reserved.
    pub async fn evaluate(
        &self,
        attributes: &RunRequestAttributes,
        now: DateTime<Utc>,
    ) -> AppResult<AdmissionDecision> {
        let rules = self.rules().await;
        for rule in rules.rules() {
            let decision = self.evaluate_rule(rule, attributes, now).await?;
            if !decision.is_admitted() {
                return Ok(decision);
            }
        }

        Ok(AdmissionDecision::Admit)
    }

    /// Evaluates every active rule and, when all admit, reserves a
    /// concurrency slot for the run while the scope keys are still locked.
    pub async fn admit(
        &self,
        run_id: RunId,
        attributes: RunRequestAttributes,
    ) -> AppResult<Admission> {
        let rules = self.rules().await;
        let keyed_rules = rules
            .rules()
            .iter()
            .map(|rule| (rule, ScopeKey::derive(rule, &attributes)))
            .collect::<Vec<_>>();

        for (rule, key) in &keyed_rules {
            if key.has_unknown() {
                debug!(rule = rule.name(), scope_key = %key, "request is missing scope attributes");
            }
        }

        let keys = keyed_rules
            .iter()
            .map(|(_, key)| key.clone())
            .collect::<Vec<_>>();
        let _guards = self.locks.lock_all(&keys).await;

        let now = Utc::now();
        for (rule, key) in &keyed_rules {
            let decision = self.evaluate_keyed(rule, key, now).await?;
            if let AdmissionDecision::Reject(rejection) = decision {
                info!(
                    %run_id,
                    rule = rejection.rule_name.as_str(),
                    threshold = %rejection.threshold,
                    current_value = rejection.current_value,
                    limit_value = rejection.limit_value,
                    scope_key = %rejection.scope_key,
                    "run rejected by rate limit"
                );
                return Ok(Admission::Rejected(rejection));
            }
        }

        let permit = self.reserve(run_id, attributes, now).await?;
        debug!(%run_id, rule_count = keyed_rules.len(), "run admitted");
        Ok(Admission::Admitted(permit))
    }

    /// Reserves a slot without evaluating rules.
    ///
    /// If the caller is cancelled while the reservation is in flight, the
    /// pending permit is dropped and releases whatever was recorded.
    pub async fn reserve(
        &self,
        run_id: RunId,
        attributes: RunRequestAttributes,
        started_at: DateTime<Utc>,
    ) -> AppResult<RunPermit> {
        let pending = RunPermit::new(
            RunReservation { run_id, started_at },
            Arc::clone(&self.history),
            self.settings.history_timeout,
        );

        let registration = RunRegistration {
            run_id,
            attributes,
            started_at,
        };

        match self
            .bounded("reserve", self.history.reserve_run(registration))
            .await
        {
            Ok(reservation) => {
                let _ = pending.detach();
                Ok(RunPermit::new(
                    reservation,
                    Arc::clone(&self.history),
                    self.settings.history_timeout,
                ))
            }
            // The id belongs to another run; releasing it would end that run.
            Err(error @ AppError::Conflict(_)) => {
                let _ = pending.detach();
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Releases the slot of a run. Safe to call repeatedly.
    pub async fn release(&self, run_id: RunId) -> AppResult<()> {
        self.bounded("release", self.history.release_run(run_id))
            .await
    }

    /// Reports the running byte count of an in-flight run.
    pub async fn record_progress(&self, run_id: RunId, bytes: u64) -> AppResult<()> {
        self.bounded(
            "progress update",
            self.history.record_run_progress(run_id, bytes),
        )
        .await
    }

    /// Finalizes a run with its byte count.
    pub async fn complete(&self, run_id: RunId, total_bytes: u64) -> AppResult<()> {
        self.bounded(
            "completion",
            self.history.record_run_completion(run_id, total_bytes),
        )
        .await
    }

    /// Reclaims slots of runs in flight for longer than `max_run_age`.
    pub async fn expire_orphaned_runs(&self, max_run_age: TimeDelta) -> AppResult<u64> {
        let cutoff = Utc::now() - max_run_age;
        let expired = self
            .bounded("orphan sweep", self.history.expire_running_before(cutoff))
            .await?;

        if expired > 0 {
            warn!(expired, %cutoff, "reclaimed orphaned run slots");
        }

        Ok(expired)
    }

    /// Removes finished runs older than `retention`. Intended for periodic
    /// cleanup; retention should exceed the longest rule window.
    pub async fn cleanup_finished_runs(&self, retention: TimeDelta) -> AppResult<u64> {
        let cutoff = Utc::now() - retention;
        self.bounded("cleanup", self.history.cleanup_finished_before(cutoff))
            .await
    }

    async fn evaluate_keyed(
        &self,
        rule: &RateLimitRule,
        key: &ScopeKey,
        now: DateTime<Utc>,
    ) -> AppResult<AdmissionDecision> {
        if !rule.has_limits() {
            return Ok(AdmissionDecision::Admit);
        }

        let (window_start, window_end) = window_bounds(rule, now);
        let records = self
            .bounded(
                "query",
                self.history.query_runs(key, window_start, window_end),
            )
            .await?;

        Ok(evaluate_window(rule, key, &records, now))
    }

    async fn bounded<T, F>(&self, operation: &str, future: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        bounded(self.settings.history_timeout, operation, future).await
    }
}

/// Runs one run history call under `timeout`, logging failures as
/// collaborator faults. Errors are returned unchanged.
async fn bounded<T, F>(timeout: Duration, operation: &str, future: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    let result = match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Unavailable(format!(
            "run history {operation} timed out after {} ms",
            timeout.as_millis()
        ))),
    };

    if let Err(error) = &result {
        warn!(operation, %error, "run history call failed");
    }

    result
}
