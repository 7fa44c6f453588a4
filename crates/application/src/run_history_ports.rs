use async_trait::async_trait;
use chrono::{DateTime, Utc};

use runguard_core::AppResult;
use runguard_domain::{RunId, RunRecord, RunRequestAttributes, ScopeKey};

/// Storage port for historical and in-flight pipeline runs.
///
/// Implementations provide read/write consistency for their own records; the
/// admission service serializes evaluate-and-reserve per scope key on top.
#[async_trait]
pub trait RunHistoryRepository: Send + Sync {
    /// Returns runs matching `scope_key` that started inside
    /// `[window_start, window_end)`, plus every matching run still in flight
    /// regardless of when it started.
    async fn query_runs(
        &self,
        scope_key: &ScopeKey,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> AppResult<Vec<RunRecord>>;

    /// Records a started run. Fails with a conflict when the id exists.
    async fn reserve_run(&self, registration: RunRegistration) -> AppResult<RunReservation>;

    /// Ends a run without a final byte count.
    ///
    /// Idempotent: releasing an unknown or already finished run is a no-op.
    async fn release_run(&self, run_id: RunId) -> AppResult<()>;

    /// Updates the running byte count of an in-flight run.
    async fn record_run_progress(&self, run_id: RunId, bytes: u64) -> AppResult<()>;

    /// Finalizes a run with its end timestamp and final byte count.
    async fn record_run_completion(&self, run_id: RunId, total_bytes: u64) -> AppResult<()>;

    /// Marks runs still in flight that started before the cutoff as
    /// abandoned. Returns the number of reclaimed runs.
    async fn expire_running_before(&self, started_before: DateTime<Utc>) -> AppResult<u64>;

    /// Removes finished runs that ended before the cutoff.
    async fn cleanup_finished_before(&self, ended_before: DateTime<Utc>) -> AppResult<u64>;
}

/// Input for reserving one concurrency slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRegistration {
    /// Run identifier chosen by the caller.
    pub run_id: RunId,
    /// Scope attributes captured for later matching.
    pub attributes: RunRequestAttributes,
    /// Admission timestamp.
    pub started_at: DateTime<Utc>,
}

/// Handle for one reserved run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReservation {
    /// Reserved run identifier.
    pub run_id: RunId,
    /// Admission timestamp.
    pub started_at: DateTime<Utc>,
}
