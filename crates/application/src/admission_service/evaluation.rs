use std::fmt::{Display, Formatter};

use chrono::{DateTime, TimeDelta, Utc};

use runguard_domain::{RateLimitRule, RunRecord, ScopeKey, ThresholdKind};

/// Outcome of evaluating a run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Every applicable rule admits the run.
    Admit,
    /// One rule rejected the run.
    Reject(Rejection),
}

impl AdmissionDecision {
    /// Returns whether the run may start.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Details of a violated threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Rule that rejected the run.
    pub rule_name: String,
    /// Threshold that was violated.
    pub threshold: ThresholdKind,
    /// Measured aggregate.
    pub current_value: u64,
    /// Configured limit.
    pub limit_value: u64,
    /// Scope bucket the aggregate was measured over.
    pub scope_key: ScopeKey,
    /// Time until the windowed aggregate drops back under the limit, when
    /// the records seen allow computing it.
    pub retry_after: Option<TimeDelta>,
}

impl Display for Rejection {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "rate limit rule '{}' rejected the run: {} is {} with limit {} for scope {}",
            self.rule_name, self.threshold, self.current_value, self.limit_value, self.scope_key
        )
    }
}

/// Aggregates measured over one scope key and window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowAggregate {
    /// Bytes reported by every matched run, running or finished.
    pub total_bytes: u64,
    /// Matched runs started inside the window.
    pub total_runs: u64,
    /// Matched runs still in flight, regardless of the window.
    pub concurrent_runs: u64,
}

/// Returns the window `[now - time_limit, now)` of a rule, clamped to the
/// earliest representable instant.
#[must_use]
pub fn window_bounds(rule: &RateLimitRule, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let window_start = now
        .checked_sub_signed(rule.time_limit().duration())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    (window_start, now)
}

/// Sums the matched records. Records outside the key or window are ignored
/// even if a store returns them.
#[must_use]
pub fn aggregate_window(
    key: &ScopeKey,
    records: &[RunRecord],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> WindowAggregate {
    matched_records(key, records, window_start, now).fold(
        WindowAggregate::default(),
        |mut aggregate, record| {
            aggregate.total_bytes = aggregate
                .total_bytes
                .saturating_add(record.bytes.unwrap_or(0));
            if record.started_within(window_start, now) {
                aggregate.total_runs += 1;
            }
            if record.is_running() {
                aggregate.concurrent_runs += 1;
            }
            aggregate
        },
    )
}

/// Decides one rule against a snapshot of run history.
///
/// Thresholds are compared in a fixed order: bytes, run count, concurrency.
/// Only the existing aggregate is checked; the new run's own size is unknown.
#[must_use]
pub fn evaluate_window(
    rule: &RateLimitRule,
    key: &ScopeKey,
    records: &[RunRecord],
    now: DateTime<Utc>,
) -> AdmissionDecision {
    if !rule.has_limits() {
        return AdmissionDecision::Admit;
    }

    let (window_start, _) = window_bounds(rule, now);
    let aggregate = aggregate_window(key, records, window_start, now);

    let reject = |threshold, current_value, limit_value, retry_after| {
        AdmissionDecision::Reject(Rejection {
            rule_name: rule.name().to_owned(),
            threshold,
            current_value,
            limit_value,
            scope_key: key.clone(),
            retry_after,
        })
    };

    if let Some(byte_limit) = rule.byte_limit()
        && aggregate.total_bytes > byte_limit
    {
        let retry_after = byte_retry_after(
            rule,
            key,
            records,
            window_start,
            now,
            aggregate.total_bytes - byte_limit,
        );
        return reject(
            ThresholdKind::ByteLimit,
            aggregate.total_bytes,
            byte_limit,
            retry_after,
        );
    }

    if let Some(run_limit) = rule.run_limit()
        && aggregate.total_runs >= run_limit
    {
        let retry_after = run_retry_after(
            rule,
            key,
            records,
            window_start,
            now,
            aggregate.total_runs - run_limit + 1,
        );
        return reject(
            ThresholdKind::RunLimit,
            aggregate.total_runs,
            run_limit,
            retry_after,
        );
    }

    if let Some(concurrency_limit) = rule.concurrency_limit() {
        let limit = u64::from(concurrency_limit.get());
        if aggregate.concurrent_runs >= limit {
            return reject(
                ThresholdKind::ConcurrencyLimit,
                aggregate.concurrent_runs,
                limit,
                None,
            );
        }
    }

    AdmissionDecision::Admit
}

fn matched_records<'a>(
    key: &'a ScopeKey,
    records: &'a [RunRecord],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a RunRecord> {
    records.iter().filter(move |record| {
        (record.is_running() || record.started_within(window_start, now))
            && key.matches(&record.attributes)
    })
}

/// Finished in-window runs leave the byte total once their start exits the
/// window; running ones keep counting until they end.
fn byte_retry_after(
    rule: &RateLimitRule,
    key: &ScopeKey,
    records: &[RunRecord],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
    excess: u64,
) -> Option<TimeDelta> {
    let mut expiring = matched_records(key, records, window_start, now)
        .filter(|record| !record.is_running() && record.started_within(window_start, now))
        .collect::<Vec<_>>();
    expiring.sort_by_key(|record| record.started_at);

    let mut dropped: u64 = 0;
    expiring.into_iter().find_map(|record| {
        dropped = dropped.saturating_add(record.bytes.unwrap_or(0));
        if dropped >= excess {
            leaves_window_in(rule, record.started_at, now)
        } else {
            None
        }
    })
}

fn run_retry_after(
    rule: &RateLimitRule,
    key: &ScopeKey,
    records: &[RunRecord],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
    runs_to_expire: u64,
) -> Option<TimeDelta> {
    let mut starts = matched_records(key, records, window_start, now)
        .filter(|record| record.started_within(window_start, now))
        .map(|record| record.started_at)
        .collect::<Vec<_>>();
    starts.sort();

    let index = usize::try_from(runs_to_expire).ok()?.checked_sub(1)?;
    starts
        .get(index)
        .and_then(|started_at| leaves_window_in(rule, *started_at, now))
}

fn leaves_window_in(
    rule: &RateLimitRule,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<TimeDelta> {
    started_at
        .checked_add_signed(rule.time_limit().duration())
        .map(|leaves_at| leaves_at.signed_duration_since(now))
}
