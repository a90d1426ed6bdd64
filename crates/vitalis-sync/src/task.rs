//! Background task for periodic reconciliation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vitalis_core::Clock;

use crate::reconciler::HealthSyncReconciler;

/// Periodically runs `sync_needed` over the configured window
pub struct SyncTask {
    reconciler: Arc<HealthSyncReconciler>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
    cycle_count: u64,
}

impl SyncTask {
    pub fn new(
        reconciler: Arc<HealthSyncReconciler>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            reconciler,
            clock,
            interval,
            shutdown_rx,
            cycle_count: 0,
        }
    }

    /// Spawn the sync task as a background task
    pub fn spawn(
        reconciler: Arc<HealthSyncReconciler>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(reconciler, clock, interval, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Sync task started");

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; the engine already synced at start
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Sync task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.cycle_count += 1;
                    let window = self.reconciler.config().window_days;
                    match self.reconciler.sync_needed(window, self.clock.now()).await {
                        Ok(report) => debug!(
                            cycle = self.cycle_count,
                            days = report.days_synced.len(),
                            "Periodic sync complete"
                        ),
                        Err(e) => warn!(cycle = self.cycle_count, error = %e, "Periodic sync failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use vitalis_core::{LocalCalendar, ManualClock, MockHealthProvider};
    use vitalis_crypto::{KeyOrigin, StoreKey};
    use vitalis_storage::{EncryptedStore, SnapshotRepository, StoreConfig};

    use crate::config::SyncConfig;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync_and_shutdown() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedStore::open(
            StoreConfig::with_path(temp.path().join("vitalis.redb")),
            StoreKey::generate(),
            KeyOrigin::Created,
        )
        .unwrap();
        let reconciler = Arc::new(HealthSyncReconciler::new(
            Arc::new(MockHealthProvider::new(LocalCalendar::utc())),
            SnapshotRepository::new(Arc::new(store)),
            LocalCalendar::utc(),
            SyncConfig::default().with_window_days(3),
        ));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 0).unwrap(),
        ));
        let mut updates = reconciler.subscribe();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = SyncTask::spawn(
            reconciler.clone(),
            clock,
            Duration::from_secs(60),
            shutdown_rx,
        );

        let first = updates.recv().await.unwrap();
        assert_eq!(first.date.to_string(), "2024-03-13");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(reconciler.snapshots().count().unwrap(), 3);
    }
}
