//! Background sweeper for network-session tombstones.
//!
//! Runs periodically to forget removals older than the retention window.

use crate::config::SessionsConfig;
use crate::network::NetworkSessions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;

/// Spawn a background tombstone sweeper.
///
/// The task exits when `shutdown` flips to `true`.
pub fn spawn_tombstone_sweeper(
    sessions: Arc<NetworkSessions>,
    config: SessionsConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval_secs = config.sweep_interval_secs.max(1);
        let retention = config.tombstone_retention();
        tracing::info!(
            "Tombstone sweeper started (interval: {}s, retention: {:?})",
            interval_secs,
            retention
        );

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("Tombstone sweeper stopping");
                    return;
                }
                _ = timer.tick() => {
                    let purged = sessions.purge_tombstones(Instant::now(), retention);
                    if purged > 0 {
                        tracing::info!("Sweep: purged {} expired tombstones", purged);
                    } else {
                        tracing::debug!("Sweep: no expired tombstones");
                    }
                }
            }
        }
    })
}
