use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use runguard_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scope::RunRequestAttributes;

/// Identifier of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a random run identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a run identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid run id '{value}': {error}")))
    }
}

/// Lifecycle state of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Admitted and holding a concurrency slot.
    Running,
    /// Finished normally with a final byte count.
    Succeeded,
    /// Slot released before completion (failure, cancellation).
    Released,
    /// Slot reclaimed by the orphan sweeper.
    Abandoned,
}

impl RunStatus {
    /// Returns stable status value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Released => "released",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses one stored status value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "released" => Ok(Self::Released),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(AppError::Internal(format!("unknown run status '{value}'"))),
        }
    }
}

/// One pipeline execution as seen by the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Scope attributes captured at admission.
    pub attributes: RunRequestAttributes,
    /// Admission timestamp.
    pub started_at: DateTime<Utc>,
    /// End timestamp, absent while the run is in flight.
    pub ended_at: Option<DateTime<Utc>>,
    /// Running or final byte count, when reported.
    pub bytes: Option<u64>,
    /// Lifecycle state.
    pub status: RunStatus,
}

impl RunRecord {
    /// Creates a record for a run that just started.
    #[must_use]
    pub fn started(
        run_id: RunId,
        attributes: RunRequestAttributes,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            attributes,
            started_at,
            ended_at: None,
            bytes: None,
            status: RunStatus::Running,
        }
    }

    /// Returns whether the run still holds a concurrency slot.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Returns whether the run started inside `[window_start, window_end)`.
    #[must_use]
    pub fn started_within(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> bool {
        self.started_at >= window_start && self.started_at < window_end
    }
}
