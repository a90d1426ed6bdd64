//! # Vitalis Node
//!
//! The local wellness engine. [`WellnessEngine`] ties together:
//! - the encrypted store (snapshots, quest ledger)
//! - the health sync reconciler
//! - the energy simulator and its periodic tasks
//!
//! and exposes the read accessors, subscriptions, and the single
//! quest-completion entry point the rest of the application uses.
//!
//! ## Example
//!
//! ```rust,ignore
//! use vitalis_core::QuestCompletion;
//! use vitalis_node::{EngineConfig, WellnessEngine};
//!
//! let engine = WellnessEngine::builder(EngineConfig::with_data_dir("./my-data")).build()?;
//! engine.start().await?;
//!
//! let _sub = engine.on_snapshot_update(|snapshot| {
//!     println!("{} steps on {}", snapshot.steps, snapshot.date);
//! }).await?;
//!
//! let outcome = engine
//!     .complete_quest(&QuestCompletion::new("drink_2l", "Drink 2L", 2.0, 10, "hydration"))
//!     .await?;
//! println!("Streak: {}", outcome.streak.count);
//!
//! engine.stop().await?;
//! ```

mod config;
mod error;
mod subscription;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use subscription::Subscription;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use vitalis_core::{
    Badge, Clock, CompletedLog, CompletionOutcome, DayKey, HealthProvider, HealthSnapshot,
    LocalCalendar, MockHealthProvider, PermissionStatus, ProviderKind, QuestCompletion,
    QuestProgress, Streak, SystemClock,
};
use vitalis_crypto::{CredentialStore, FileCredentialStore, StoreKeyManager};
use vitalis_energy::{EnergySimulator, EnergyState, EnergyTasks};
use vitalis_storage::{
    EncryptedStore, QuestLedger, QuestRepository, SnapshotRepository, StoreOpenReport,
};
use vitalis_sync::{HealthSyncReconciler, SyncReport, SyncTask};

/// Everything that needs the open store
struct Components {
    store: Arc<EncryptedStore>,
    snapshots: SnapshotRepository,
    quests: QuestRepository,
    ledger: QuestLedger,
    reconciler: Arc<HealthSyncReconciler>,
    energy: Arc<EnergySimulator>,
}

/// Builder for [`WellnessEngine`]
pub struct WellnessEngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    calendar: Option<LocalCalendar>,
    platform_provider: Option<Arc<dyn HealthProvider>>,
    mock_provider: Option<Arc<MockHealthProvider>>,
    credentials: Option<Arc<dyn CredentialStore>>,
}

impl WellnessEngineBuilder {
    /// Use a specific clock (tests use a `ManualClock`)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a specific local calendar instead of the configured one
    pub fn with_calendar(mut self, calendar: LocalCalendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Register the host platform's health provider
    pub fn with_platform_provider(mut self, provider: Arc<dyn HealthProvider>) -> Self {
        self.platform_provider = Some(provider);
        self
    }

    /// Use this mock whenever the mock provider is selected
    pub fn with_mock_provider(mut self, provider: Arc<MockHealthProvider>) -> Self {
        self.mock_provider = Some(provider);
        self
    }

    /// Keep the store key somewhere other than the data directory
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Resolve the provider and calendar; nothing is opened yet
    pub fn build(self) -> EngineResult<WellnessEngine> {
        let calendar = match self.calendar {
            Some(calendar) => calendar,
            None => self.config.calendar()?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mock = || -> Arc<dyn HealthProvider> {
            match &self.mock_provider {
                Some(mock) => mock.clone(),
                None => Arc::new(MockHealthProvider::new(calendar)),
            }
        };

        let provider = match self.config.provider {
            ProviderKind::Mock => mock(),
            ProviderKind::Platform => match &self.platform_provider {
                Some(provider) => provider.clone(),
                None => {
                    warn!("No platform health provider registered; using the mock provider");
                    mock()
                }
            },
        };

        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(FileCredentialStore::new(&self.config.credentials_dir()))
        });

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            data_dir = %self.config.data_dir.display(),
            platform = ?provider.platform(),
            "Engine created"
        );

        Ok(WellnessEngine {
            config: self.config,
            calendar,
            clock,
            provider,
            credentials,
            components: OnceCell::new(),
            shutdown_tx,
            background_tasks: Mutex::new(Vec::new()),
            energy_tasks: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }
}

/// The local reconciliation and derived-state engine
///
/// The store is opened on first use. [`start`](Self::start) runs an
/// initial sync and launches the background tasks; [`stop`](Self::stop)
/// tears them down.
pub struct WellnessEngine {
    config: EngineConfig,
    calendar: LocalCalendar,
    clock: Arc<dyn Clock>,
    provider: Arc<dyn HealthProvider>,
    credentials: Arc<dyn CredentialStore>,
    /// Opened lazily, once
    components: OnceCell<Components>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Periodic sync task, when enabled
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    energy_tasks: Mutex<Option<EnergyTasks>>,
    started: AtomicBool,
}

impl WellnessEngine {
    /// Start building an engine
    pub fn builder(config: EngineConfig) -> WellnessEngineBuilder {
        WellnessEngineBuilder {
            config,
            clock: None,
            calendar: None,
            platform_provider: None,
            mock_provider: None,
            credentials: None,
        }
    }

    /// Engine with the system clock, configured calendar, and file credentials
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn provider(&self) -> &Arc<dyn HealthProvider> {
        &self.provider
    }

    /// Today's key in the local calendar
    pub fn today(&self) -> DayKey {
        self.calendar.day_key(self.clock.now())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn components(&self) -> EngineResult<&Components> {
        self.components
            .get_or_try_init(|| async { self.open_components().await })
            .await
    }

    #[instrument(skip(self), fields(data_dir = %self.config.data_dir.display()))]
    async fn open_components(&self) -> EngineResult<Components> {
        let store_config = self.config.resolved_store();
        let credentials = self.credentials.clone();

        let store = tokio::task::spawn_blocking(move || {
            let keys = StoreKeyManager::new(credentials);
            EncryptedStore::open_with_keys(store_config, &keys)
        })
        .await??;
        let store = Arc::new(store);

        let report = store.open_report();
        if report.key_origin.is_data_loss() || report.lost_data() {
            warn!(
                key_origin = ?report.key_origin,
                quarantined = ?report.quarantined_file,
                "Store opened without its previous data"
            );
        }

        let snapshots = SnapshotRepository::new(store.clone());
        let reconciler = Arc::new(HealthSyncReconciler::new(
            self.provider.clone(),
            snapshots.clone(),
            self.calendar,
            self.config.sync.clone(),
        ));
        let energy = Arc::new(EnergySimulator::new(
            self.config.energy.clone(),
            self.calendar,
            self.clock.clone(),
            self.provider.clone(),
            snapshots.clone(),
        ));

        Ok(Components {
            quests: QuestRepository::new(store.clone()),
            ledger: QuestLedger::new(store.clone(), self.config.badges.clone()),
            store,
            snapshots,
            reconciler,
            energy,
        })
    }

    /// How the store was opened: key origin, quarantine, migrations
    pub async fn open_report(&self) -> EngineResult<StoreOpenReport> {
        Ok(self.components().await?.store.open_report().clone())
    }

    /// Start the engine
    ///
    /// Syncs the configured window, then launches the energy tasks and,
    /// when configured, the periodic sync.
    #[instrument(skip(self))]
    pub async fn start(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let components = match self.components().await {
            Ok(components) => components,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let now = self.clock.now();
        match components
            .reconciler
            .sync_needed(self.config.sync.window_days, now)
            .await
        {
            Ok(report) => debug!(days = report.days_synced.len(), "Initial sync complete"),
            Err(e) => warn!(error = %e, "Initial sync failed"),
        }

        let energy_tasks = components
            .energy
            .spawn(Some(components.reconciler.subscribe()));
        *self.energy_tasks.lock().await = Some(energy_tasks);

        if let Some(interval) = self.config.sync.periodic_interval() {
            let task = SyncTask::spawn(
                components.reconciler.clone(),
                self.clock.clone(),
                interval,
                self.shutdown_tx.subscribe(),
            );
            self.background_tasks.lock().await.push(task);
        }

        info!("Engine started");
        Ok(())
    }

    /// Stop the engine and wait for its tasks
    #[instrument(skip(self))]
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already stopped
        }

        // Signal shutdown
        let _ = self.shutdown_tx.send(());

        if let Some(tasks) = self.energy_tasks.lock().await.take() {
            tasks.shutdown().await;
        }

        let mut tasks = self.background_tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!("Engine stopped");
        Ok(())
    }

    // ---- Health sync ----

    /// Ask the health provider for read access
    pub async fn request_permissions(&self) -> EngineResult<PermissionStatus> {
        Ok(self.components().await?.reconciler.request_permissions().await)
    }

    /// Backfill and refresh the `max_days` window ending today
    pub async fn sync_needed(&self, max_days: u32) -> EngineResult<SyncReport> {
        let now = self.clock.now();
        let components = self.components().await?;
        let report = components.reconciler.sync_needed(max_days, now).await?;
        self.settle_energy(components, now)?;
        Ok(report)
    }

    /// Refresh today only
    pub async fn sync_latest(&self) -> EngineResult<SyncReport> {
        let now = self.clock.now();
        let components = self.components().await?;
        let report = components.reconciler.sync_latest(now).await?;
        self.settle_energy(components, now)?;
        Ok(report)
    }

    /// The application came to the foreground
    ///
    /// Catches up on the configured window and on energy drained while
    /// in the background.
    pub async fn on_foreground(&self) -> EngineResult<SyncReport> {
        let report = self.sync_needed(self.config.sync.window_days).await?;
        let components = self.components().await?;
        components.energy.deplete_tick(self.clock.now());
        Ok(report)
    }

    /// Bring the energy day up to date and apply today's stored snapshot
    fn settle_energy(&self, components: &Components, now: DateTime<Utc>) -> EngineResult<()> {
        let energy = &components.energy;
        energy.check_rollover(now)?;
        energy.load_baseline(now)?;
        Ok(())
    }

    // ---- Snapshots ----

    /// Receive every snapshot written from now on
    pub async fn subscribe_snapshots(&self) -> EngineResult<broadcast::Receiver<HealthSnapshot>> {
        Ok(self.components().await?.reconciler.subscribe())
    }

    /// Invoke `callback` for every snapshot written from now on
    pub async fn on_snapshot_update<F>(&self, callback: F) -> EngineResult<Subscription>
    where
        F: Fn(HealthSnapshot) + Send + 'static,
    {
        let updates = self.subscribe_snapshots().await?;
        Ok(Subscription::spawn(
            updates,
            self.shutdown_tx.subscribe(),
            callback,
        ))
    }

    pub async fn latest_snapshot(&self) -> EngineResult<Option<HealthSnapshot>> {
        Ok(self.components().await?.snapshots.get_latest()?)
    }

    pub async fn snapshot_for(&self, day: DayKey) -> EngineResult<Option<HealthSnapshot>> {
        Ok(self.components().await?.snapshots.get_by_date(day)?)
    }

    /// The most recent `limit` days, oldest first
    pub async fn history(&self, limit: usize) -> EngineResult<Vec<HealthSnapshot>> {
        Ok(self.components().await?.snapshots.get_history(limit)?)
    }

    // ---- Energy ----

    /// Current energy; `None` means no sleep baseline for today
    pub async fn energy_pct(&self) -> EngineResult<Option<f64>> {
        Ok(self.components().await?.energy.energy_pct())
    }

    pub async fn energy_state(&self) -> EngineResult<EnergyState> {
        Ok(self.components().await?.energy.state())
    }

    /// Observe every energy change
    pub async fn subscribe_energy(&self) -> EngineResult<watch::Receiver<EnergyState>> {
        Ok(self.components().await?.energy.subscribe())
    }

    /// Apply rollover, baseline, depletion, and naps up to now
    ///
    /// For callers that do not run the background tasks.
    pub async fn refresh_energy(&self) -> EngineResult<Option<f64>> {
        let now = self.clock.now();
        let components = self.components().await?;
        self.settle_energy(components, now)?;
        components.energy.deplete_tick(now);
        if let Err(e) = components.energy.poll_naps(now).await {
            debug!(error = %e, "Nap poll failed");
        }
        Ok(components.energy.energy_pct())
    }

    /// Minutes slept last night, straight from the provider; `0` when unknown
    pub async fn last_night_sleep_minutes(&self) -> EngineResult<u32> {
        let now = self.clock.now();
        Ok(self
            .components()
            .await?
            .reconciler
            .last_night_sleep_minutes(now)
            .await)
    }

    /// When energy will drop to `threshold_pct` at the current drain rate
    pub async fn predict_energy_crossing(
        &self,
        threshold_pct: f64,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        Ok(self
            .components()
            .await?
            .energy
            .predict_crossing(threshold_pct, now))
    }

    // ---- Quests ----

    /// Complete a quest for today, atomically
    pub async fn complete_quest(
        &self,
        request: &QuestCompletion,
    ) -> EngineResult<CompletionOutcome> {
        let now = self.clock.now();
        let today = self.calendar.day_key(now);
        Ok(self
            .components()
            .await?
            .ledger
            .complete_quest(request, today, now)?)
    }

    pub async fn quest_progress(
        &self,
        quest_id: &str,
        day: DayKey,
    ) -> EngineResult<Option<QuestProgress>> {
        Ok(self.components().await?.quests.progress(quest_id, day)?)
    }

    pub async fn streaks(&self) -> EngineResult<Vec<Streak>> {
        Ok(self.components().await?.quests.streaks()?)
    }

    pub async fn streak(&self, quest_id: &str) -> EngineResult<Option<Streak>> {
        Ok(self.components().await?.quests.streak(quest_id)?)
    }

    /// Streak length as of today; 0 once a day has been missed
    pub async fn current_streak(&self, quest_id: &str) -> EngineResult<u32> {
        let today = self.today();
        Ok(self
            .streak(quest_id)
            .await?
            .map(|s| s.current_as_of(today))
            .unwrap_or(0))
    }

    pub async fn points(&self) -> EngineResult<BTreeMap<String, u64>> {
        Ok(self.components().await?.quests.points()?)
    }

    pub async fn points_for(&self, tag: &str) -> EngineResult<u64> {
        Ok(self.components().await?.quests.points_for(tag)?)
    }

    /// Completion history, newest first
    pub async fn history_log(&self, limit: usize) -> EngineResult<Vec<CompletedLog>> {
        Ok(self.components().await?.quests.history_log(limit)?)
    }

    pub async fn badges(&self) -> EngineResult<Vec<Badge>> {
        Ok(self.components().await?.quests.badges()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use vitalis_core::ManualClock;
    use vitalis_crypto::MemoryCredentialStore;

    fn engine(temp: &TempDir, config: EngineConfig) -> (WellnessEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
        ));
        let engine = WellnessEngine::builder(EngineConfig {
            data_dir: temp.path().to_path_buf(),
            ..config
        })
        .with_clock(clock.clone())
        .with_calendar(LocalCalendar::utc())
        .with_credentials(Arc::new(MemoryCredentialStore::new()))
        .build()
        .unwrap();
        (engine, clock)
    }

    #[test]
    fn test_store_opens_lazily() {
        let temp = TempDir::new().unwrap();
        let (engine, _) = engine(&temp, EngineConfig::default());
        assert!(!temp.path().join("vitalis.redb").exists());

        let latest = tokio_test::block_on(engine.latest_snapshot()).unwrap();
        assert!(latest.is_none());
        assert!(temp.path().join("vitalis.redb").exists());
    }

    #[test]
    fn test_platform_falls_back_to_mock() {
        let temp = TempDir::new().unwrap();
        let (engine, _) = engine(
            &temp,
            EngineConfig::default().with_provider(ProviderKind::Platform),
        );
        assert_eq!(engine.provider().platform(), vitalis_core::Platform::Mock);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::default()
            .with_sync(vitalis_sync::SyncConfig::default().with_window_days(3));
        let (engine, _) = engine(&temp, config);

        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(EngineError::AlreadyStarted)));
        engine.stop().await.unwrap();
        assert!(!engine.is_started());

        // Stopping again is a no-op
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_syncs_window() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::default()
            .with_sync(vitalis_sync::SyncConfig::default().with_window_days(5));
        let (engine, _) = engine(&temp, config);

        engine.start().await.unwrap();
        assert_eq!(engine.history(30).await.unwrap().len(), 5);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_current_streak_breaks_after_gap() {
        let temp = TempDir::new().unwrap();
        let (engine, clock) = engine(&temp, EngineConfig::default());
        let request = QuestCompletion::new("stretch", "Stretch", 1.0, 5, "mobility");

        engine.complete_quest(&request).await.unwrap();
        assert_eq!(engine.current_streak("stretch").await.unwrap(), 1);

        clock.advance_minutes(2 * 24 * 60);
        assert_eq!(engine.current_streak("stretch").await.unwrap(), 0);
        assert_eq!(engine.streak("stretch").await.unwrap().unwrap().count, 1);
        assert_eq!(engine.current_streak("unknown").await.unwrap(), 0);
    }
}
