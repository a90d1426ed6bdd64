//! Periodic energy tasks
//!
//! Three independent loops share the simulator: depletion, day rollover,
//! and nap polling. An optional fourth listens for synced snapshots. All
//! of them stop on shutdown, and any still running are aborted on drop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vitalis_core::HealthSnapshot;

use crate::simulator::EnergySimulator;

/// Handles to the running energy loops
pub struct EnergyTasks {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl EnergyTasks {
    pub(crate) fn spawn(
        sim: Arc<EnergySimulator>,
        snapshots: Option<broadcast::Receiver<HealthSnapshot>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = sim.config().clone();
        let mut handles = Vec::with_capacity(4);

        handles.push(spawn_periodic(
            "depletion",
            config.tick_interval(),
            shutdown_tx.subscribe(),
            sim.clone(),
            |sim| async move {
                let now = sim.clock().now();
                sim.deplete_tick(now);
            },
        ));

        handles.push(spawn_periodic(
            "rollover",
            config.rollover_check_interval(),
            shutdown_tx.subscribe(),
            sim.clone(),
            |sim| async move {
                let now = sim.clock().now();
                if let Err(e) = sim.check_rollover(now) {
                    warn!(error = %e, "Rollover check failed");
                }
            },
        ));

        handles.push(spawn_periodic(
            "nap-poll",
            config.nap_poll_interval(),
            shutdown_tx.subscribe(),
            sim.clone(),
            |sim| async move {
                let now = sim.clock().now();
                if let Err(e) = sim.poll_naps(now).await {
                    debug!(error = %e, "Nap poll failed");
                }
            },
        ));

        if let Some(rx) = snapshots {
            handles.push(spawn_snapshot_listener(sim, rx, shutdown_tx.subscribe()));
        }

        info!(tasks = handles.len(), "Energy tasks started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Number of running loops
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop and wait for it to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Energy task ended abnormally");
            }
        }
        info!("Energy tasks stopped");
    }
}

impl Drop for EnergyTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    sim: Arc<EnergySimulator>,
    step: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<EnergySimulator>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(task = name, "Energy task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    step(sim.clone()).await;
                }
            }
        }
    })
}

fn spawn_snapshot_listener(
    sim: Arc<EnergySimulator>,
    mut rx: broadcast::Receiver<HealthSnapshot>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = rx.recv() => match received {
                    Ok(snapshot) => {
                        sim.on_snapshot(&snapshot);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Energy listener lagged behind snapshot updates");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use vitalis_core::{DayKey, LocalCalendar, ManualClock, MockHealthProvider, Platform};
    use vitalis_crypto::{KeyOrigin, StoreKey};
    use vitalis_storage::{EncryptedStore, SnapshotRepository, StoreConfig};

    use crate::config::EnergyConfig;

    #[tokio::test(start_paused = true)]
    async fn test_tasks_deplete_listen_and_stop() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedStore::open(
            StoreConfig::with_path(temp.path().join("vitalis.redb")),
            StoreKey::generate(),
            KeyOrigin::Created,
        )
        .unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let sim = Arc::new(EnergySimulator::new(
            EnergyConfig::default(),
            LocalCalendar::utc(),
            clock.clone(),
            Arc::new(MockHealthProvider::new(LocalCalendar::utc()).with_sleep_sessions(Vec::new())),
            SnapshotRepository::new(Arc::new(store)),
        ));

        let (snapshot_tx, snapshot_rx) = broadcast::channel(8);
        let tasks = sim.spawn(Some(snapshot_rx));
        assert_eq!(tasks.len(), 4);
        assert!(sim.energy_pct().is_none());

        let mut snapshot = HealthSnapshot::new(
            DayKey::from_ymd(2024, 5, 10).unwrap(),
            start,
            Platform::Mock,
        );
        snapshot.sleep_minutes = 480;
        snapshot_tx.send(snapshot).unwrap();

        let mut state_rx = sim.subscribe();
        state_rx
            .wait_for(|state| state.energy_pct.is_some())
            .await
            .unwrap();

        clock.advance_minutes(20);
        tokio::time::sleep(Duration::from_secs(61)).await;
        let pct = sim.energy_pct().unwrap();
        assert!((pct - 99.0).abs() < 1e-9, "got {pct}");

        tasks.shutdown().await;
    }
}
