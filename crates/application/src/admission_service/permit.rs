use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use runguard_core::AppResult;
use runguard_domain::RunId;

use super::bounded;
use crate::run_history_ports::{RunHistoryRepository, RunReservation};

/// One reserved concurrency slot.
///
/// The slot is finished exactly once through [`RunPermit::complete`] or
/// [`RunPermit::release`], or handed to an external owner with
/// [`RunPermit::detach`]. Dropping an unfinished permit releases the slot in
/// the background, which covers cancelled requests and panicking runs.
pub struct RunPermit {
    reservation: RunReservation,
    history: Arc<dyn RunHistoryRepository>,
    timeout: Duration,
    settled: bool,
}

impl RunPermit {
    pub(super) fn new(
        reservation: RunReservation,
        history: Arc<dyn RunHistoryRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            reservation,
            history,
            timeout,
            settled: false,
        }
    }

    /// Returns the reserved run identifier.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.reservation.run_id
    }

    /// Reports the running byte count.
    pub async fn record_progress(&self, bytes: u64) -> AppResult<()> {
        bounded(
            self.timeout,
            "progress update",
            self.history.record_run_progress(self.reservation.run_id, bytes),
        )
        .await
    }

    /// Finalizes the run. On failure the permit still releases on drop.
    pub async fn complete(mut self, total_bytes: u64) -> AppResult<()> {
        bounded(
            self.timeout,
            "completion",
            self.history
                .record_run_completion(self.reservation.run_id, total_bytes),
        )
        .await?;
        self.settled = true;
        Ok(())
    }

    /// Gives the slot back without a final byte count.
    pub async fn release(mut self) -> AppResult<()> {
        bounded(
            self.timeout,
            "release",
            self.history.release_run(self.reservation.run_id),
        )
        .await?;
        self.settled = true;
        Ok(())
    }

    /// Stops tracking the permit locally; the caller becomes responsible for
    /// completing or releasing the run by id.
    #[must_use]
    pub fn detach(mut self) -> RunReservation {
        self.settled = true;
        self.reservation
    }
}

impl std::fmt::Debug for RunPermit {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RunPermit")
            .field("reservation", &self.reservation)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let run_id = self.reservation.run_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(%run_id, "run permit dropped outside a runtime; slot stays reserved until the orphan sweep");
            return;
        };

        warn!(%run_id, "run permit dropped without completion, releasing slot");
        let history = Arc::clone(&self.history);
        let timeout = self.timeout;
        runtime.spawn(async move {
            if let Err(error) = bounded(timeout, "release", history.release_run(run_id)).await {
                error!(%run_id, %error, "failed to release dropped run permit");
            }
        });
    }
}
