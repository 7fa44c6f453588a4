use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use runguard_application::{RunHistoryRepository, RunRegistration, RunReservation};
use runguard_core::{AppError, AppResult};
use runguard_domain::{RunId, RunRecord, RunStatus, ScopeKey};

/// In-memory run history adapter.
///
/// Suitable for a single admission process and for tests. Records are lost on
/// restart, which also drops every in-flight reservation.
#[derive(Default)]
pub struct InMemoryRunHistory {
    runs: RwLock<HashMap<RunId, RunRecord>>,
}

impl InMemoryRunHistory {
    /// Creates an empty run history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a run history seeded with existing records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = RunRecord>) -> Self {
        Self {
            runs: RwLock::new(
                records
                    .into_iter()
                    .map(|record| (record.run_id, record))
                    .collect(),
            ),
        }
    }

    /// Returns one stored record.
    pub async fn find(&self, run_id: RunId) -> Option<RunRecord> {
        self.runs.read().await.get(&run_id).cloned()
    }
}

#[async_trait]
impl RunHistoryRepository for InMemoryRunHistory {
    async fn query_runs(
        &self,
        scope_key: &ScopeKey,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> AppResult<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        let mut matched = runs
            .values()
            .filter(|run| run.is_running() || run.started_within(window_start, window_end))
            .filter(|run| scope_key.matches(&run.attributes))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by_key(|run| run.started_at);

        Ok(matched)
    }

    async fn reserve_run(&self, registration: RunRegistration) -> AppResult<RunReservation> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&registration.run_id) {
            return Err(AppError::Conflict(format!(
                "run '{}' already exists",
                registration.run_id
            )));
        }

        let reservation = RunReservation {
            run_id: registration.run_id,
            started_at: registration.started_at,
        };
        runs.insert(
            registration.run_id,
            RunRecord::started(
                registration.run_id,
                registration.attributes,
                registration.started_at,
            ),
        );

        Ok(reservation)
    }

    async fn release_run(&self, run_id: RunId) -> AppResult<()> {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(&run_id)
            && run.is_running()
        {
            run.ended_at = Some(Utc::now());
            run.status = RunStatus::Released;
        }

        Ok(())
    }

    async fn record_run_progress(&self, run_id: RunId, bytes: u64) -> AppResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| AppError::NotFound(format!("run '{run_id}' does not exist")))?;

        if !run.is_running() {
            return Err(AppError::Conflict(format!(
                "run '{run_id}' is already {}",
                run.status.as_str()
            )));
        }

        run.bytes = Some(bytes);
        Ok(())
    }

    async fn record_run_completion(&self, run_id: RunId, total_bytes: u64) -> AppResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| AppError::NotFound(format!("run '{run_id}' does not exist")))?;

        run.ended_at = Some(run.ended_at.unwrap_or_else(Utc::now));
        run.bytes = Some(total_bytes);
        run.status = RunStatus::Succeeded;
        Ok(())
    }

    async fn expire_running_before(&self, started_before: DateTime<Utc>) -> AppResult<u64> {
        let now = Utc::now();
        let mut runs = self.runs.write().await;
        let mut expired = 0;
        for run in runs
            .values_mut()
            .filter(|run| run.is_running() && run.started_at < started_before)
        {
            run.ended_at = Some(now);
            run.status = RunStatus::Abandoned;
            expired += 1;
        }

        Ok(expired)
    }

    async fn cleanup_finished_before(&self, ended_before: DateTime<Utc>) -> AppResult<u64> {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, run| run.ended_at.is_none_or(|ended_at| ended_at >= ended_before));

        Ok(u64::try_from(before - runs.len()).unwrap_or(u64::MAX))
    }
}
