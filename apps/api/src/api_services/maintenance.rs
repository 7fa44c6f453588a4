use std::time::Duration;

use chrono::TimeDelta;
use runguard_application::AdmissionService;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodically reclaims orphaned run slots and prunes old finished runs.
pub fn spawn_run_history_maintenance(
    admission_service: AdmissionService,
    interval: Duration,
    orphan_run_max_age: TimeDelta,
    finished_run_retention: TimeDelta,
) -> JoinHandle<()> {
    info!(
        interval_seconds = interval.as_secs(),
        orphan_run_max_age_seconds = orphan_run_max_age.num_seconds(),
        retention_hours = finished_run_retention.num_hours(),
        "run history maintenance started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(error) = admission_service
                .expire_orphaned_runs(orphan_run_max_age)
                .await
            {
                warn!(%error, "orphaned run sweep failed");
            }

            match admission_service
                .cleanup_finished_runs(finished_run_retention)
                .await
            {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "pruned finished runs"),
                Err(error) => warn!(%error, "finished run cleanup failed"),
            }
        }
    })
}
