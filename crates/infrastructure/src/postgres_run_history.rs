//! PostgreSQL-backed run history using the `pipeline_runs` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use runguard_application::{RunHistoryRepository, RunRegistration, RunReservation};
use runguard_core::{AppError, AppResult};
use runguard_domain::{
    RunId, RunRecord, RunRequestAttributes, RunStatus, ScopeKey, UNKNOWN_SCOPE_VALUE,
};

#[cfg(test)]
mod tests;

/// PostgreSQL implementation of the run history port.
#[derive(Clone)]
pub struct PostgresRunHistory {
    pool: PgPool,
}

impl PostgresRunHistory {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunHistoryRepository for PostgresRunHistory {
    async fn query_runs(
        &self,
        scope_key: &ScopeKey,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> AppResult<Vec<RunRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            SELECT run_id, attributes::text AS attributes, started_at, ended_at, bytes, status
            FROM pipeline_runs
            WHERE (ended_at IS NULL OR (started_at >= "#,
        );
        builder.push_bind(window_start);
        builder.push(" AND started_at < ");
        builder.push_bind(window_end);
        builder.push("))");

        for (dimension, value) in scope_key.pairs() {
            if value == UNKNOWN_SCOPE_VALUE {
                builder.push(" AND (attributes ->> ");
                builder.push_bind(dimension.as_str().to_owned());
                builder.push(" IS NULL OR attributes ->> ");
                builder.push_bind(dimension.as_str().to_owned());
                builder.push(" ~ '^[[:space:]]*$' OR attributes ->> ");
                builder.push_bind(dimension.as_str().to_owned());
                builder.push(" = ");
                builder.push_bind(UNKNOWN_SCOPE_VALUE);
                builder.push(")");
            } else {
                builder.push(" AND attributes ->> ");
                builder.push_bind(dimension.as_str().to_owned());
                builder.push(" = ");
                builder.push_bind(value.clone());
            }
        }
        builder.push(" ORDER BY started_at ASC");

        let rows = builder
            .build_query_as::<RunRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|error| storage_error("failed to query pipeline runs", error))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = RunRecord::try_from(row)?;
            // SQL whitespace matching is broader than scope resolution.
            if scope_key.matches(&record.attributes) {
                records.push(record);
            }
        }
        debug!(scope_key = %scope_key, records = records.len(), "loaded pipeline runs");

        Ok(records)
    }

    async fn reserve_run(&self, registration: RunRegistration) -> AppResult<RunReservation> {
        let attributes = serde_json::to_string(&registration.attributes).map_err(|error| {
            AppError::Internal(format!("failed to encode run attributes: {error}"))
        })?;

        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO pipeline_runs (run_id, attributes, started_at, status)
            VALUES ($1, $2::jsonb, $3, 'running')
            ON CONFLICT (run_id) DO NOTHING
            RETURNING run_id
            "#,
        )
        .bind(registration.run_id.as_uuid())
        .bind(attributes)
        .bind(registration.started_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| storage_error("failed to reserve pipeline run", error))?;

        if inserted.is_none() {
            return Err(AppError::Conflict(format!(
                "run '{}' already exists",
                registration.run_id
            )));
        }

        Ok(RunReservation {
            run_id: registration.run_id,
            started_at: registration.started_at,
        })
    }

    async fn release_run(&self, run_id: RunId) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET ended_at = $2, status = 'released'
            WHERE run_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|error| storage_error("failed to release pipeline run", error))?;

        Ok(())
    }

    async fn record_run_progress(&self, run_id: RunId, bytes: u64) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET bytes = $2
            WHERE run_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(bytes_to_db(bytes)?)
        .execute(&self.pool)
        .await
        .map_err(|error| storage_error("failed to record pipeline run progress", error))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status
            FROM pipeline_runs
            WHERE run_id = $1
            "#,
        )
        .bind(run_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| storage_error("failed to load pipeline run status", error))?;

        match status {
            Some(status) => Err(AppError::Conflict(format!(
                "run '{run_id}' is already {status}"
            ))),
            None => Err(AppError::NotFound(format!("run '{run_id}' does not exist"))),
        }
    }

    async fn record_run_completion(&self, run_id: RunId, total_bytes: u64) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET
                bytes = $2,
                status = 'succeeded',
                ended_at = COALESCE(ended_at, $3)
            WHERE run_id = $1
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(bytes_to_db(total_bytes)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|error| storage_error("failed to record pipeline run completion", error))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("run '{run_id}' does not exist")));
        }

        Ok(())
    }

    async fn expire_running_before(&self, started_before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET ended_at = $2, status = 'abandoned'
            WHERE ended_at IS NULL AND started_at < $1
            "#,
        )
        .bind(started_before)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|error| storage_error("failed to expire orphaned pipeline runs", error))?;

        Ok(result.rows_affected())
    }

    async fn cleanup_finished_before(&self, ended_before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM pipeline_runs
            WHERE ended_at IS NOT NULL AND ended_at < $1
            "#,
        )
        .bind(ended_before)
        .execute(&self.pool)
        .await
        .map_err(|error| storage_error("failed to cleanup finished pipeline runs", error))?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: Uuid,
    attributes: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    bytes: Option<i64>,
    status: String,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = AppError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let attributes =
            serde_json::from_str::<RunRequestAttributes>(&row.attributes).map_err(|error| {
                AppError::Internal(format!(
                    "invalid attributes stored for run '{}': {error}",
                    row.run_id
                ))
            })?;

        let bytes = row
            .bytes
            .map(|bytes| {
                u64::try_from(bytes).map_err(|_| {
                    AppError::Internal(format!(
                        "negative byte count stored for run '{}'",
                        row.run_id
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            run_id: RunId::from_uuid(row.run_id),
            attributes,
            started_at: row.started_at,
            ended_at: row.ended_at,
            bytes,
            status: RunStatus::parse(row.status.as_str())?,
        })
    }
}

fn bytes_to_db(bytes: u64) -> AppResult<i64> {
    i64::try_from(bytes)
        .map_err(|_| AppError::Validation(format!("byte count {bytes} exceeds storage range")))
}

fn storage_error(context: &str, error: sqlx::Error) -> AppError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            AppError::Unavailable(format!("{context}: {error}"))
        }
        error => AppError::Internal(format!("{context}: {error}")),
    }
}
