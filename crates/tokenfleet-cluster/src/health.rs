//! Background health sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::coordinator::ClusterCoordinator;

/// Spawn a task that runs [`ClusterCoordinator::sweep`] every `interval`.
///
/// The task runs until the returned handle is aborted or the runtime shuts
/// down. Intervals below one second are raised to one second.
#[must_use]
pub fn spawn_health_sweeper(
    coordinator: Arc<ClusterCoordinator>,
    interval: Duration,
) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = interval.as_secs(), "Health sweeper started");

        loop {
            ticker.tick().await;
            let report = coordinator.sweep(Utc::now());
            if !report.is_empty() {
                tracing::warn!(
                    marked_unhealthy = report.marked_unhealthy,
                    demoted = report.demoted,
                    evicted = report.evicted,
                    "Health sweep changed cluster state"
                );
            }
        }
    })
}
