//! Periodic retention sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tune432::ArtifactStore;

/// Sweep `store` every `every`, removing files at least `retention` old,
/// until `shutdown` is cancelled.
///
/// The first sweep runs immediately, which reclaims anything left behind by
/// a previous process.
pub fn spawn_sweeper(
    store: ArtifactStore,
    retention: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            retention_secs = retention.as_secs(),
            every_secs = every.as_secs(),
            "retention sweep scheduled"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match store.sweep(retention).await {
                Ok(report) => debug!(
                    scanned = report.scanned,
                    removed = report.removed,
                    "sweep finished"
                ),
                Err(e) => warn!(error = %e, "sweep failed"),
            }
        }
        info!("retention sweep stopped");
    })
}
