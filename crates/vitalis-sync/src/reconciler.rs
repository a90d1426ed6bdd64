//! Health sync reconciler
//!
//! Decides which days in the rolling window are missing or stale, fetches
//! them from the health provider, and upserts one snapshot per day.
//!
//! Days are synced oldest first, one at a time. Within a day the metric
//! accessors run concurrently. Each accessor is bounded by a timeout, and
//! a failure degrades only that metric: additive counts become `0`,
//! everything else becomes unknown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};
use vitalis_core::{
    DayKey, HealthProvider, HealthSnapshot, LocalCalendar, Metric, PermissionStatus,
    ProviderError, ProviderResult, WellnessMetrics,
};
use vitalis_storage::SnapshotRepository;

use crate::config::SyncConfig;
use crate::error::SyncResult;

/// What one sync pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Days written, oldest first
    pub days_synced: Vec<DayKey>,
    /// Subset of `days_synced` that are now finalized
    pub finalized: Vec<DayKey>,
    /// Metrics that failed or timed out, per day
    pub failed_metrics: Vec<(DayKey, Metric)>,
    /// True when nothing was stale and only today was refreshed
    pub latest_only: bool,
}

impl SyncReport {
    fn record(&mut self, snapshot: &HealthSnapshot, failed: Vec<Metric>) {
        self.days_synced.push(snapshot.date);
        if snapshot.finalized {
            self.finalized.push(snapshot.date);
        }
        self.failed_metrics
            .extend(failed.into_iter().map(|metric| (snapshot.date, metric)));
    }
}

/// Keeps the snapshot repository in step with the health provider
pub struct HealthSyncReconciler {
    provider: Arc<dyn HealthProvider>,
    snapshots: SnapshotRepository,
    calendar: LocalCalendar,
    config: SyncConfig,
    updates: broadcast::Sender<HealthSnapshot>,
    /// Serializes passes so backfill order stays deterministic
    pass_lock: Mutex<()>,
}

impl HealthSyncReconciler {
    pub fn new(
        provider: Arc<dyn HealthProvider>,
        snapshots: SnapshotRepository,
        calendar: LocalCalendar,
        config: SyncConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            provider,
            snapshots,
            calendar,
            config,
            updates,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn provider(&self) -> &Arc<dyn HealthProvider> {
        &self.provider
    }

    pub fn snapshots(&self) -> &SnapshotRepository {
        &self.snapshots
    }

    /// Receive every snapshot written from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HealthSnapshot> {
        self.updates.subscribe()
    }

    /// Ask the provider for read access
    ///
    /// Denial is not an error: later syncs still run and record zeros and
    /// unknowns.
    pub async fn request_permissions(&self) -> PermissionStatus {
        if !self.provider.is_available().await {
            warn!("Health provider is not available on this device");
            return PermissionStatus::Unknown;
        }
        let status = self.provider.request_permissions().await;
        if status == PermissionStatus::Denied {
            warn!("Health permissions denied");
        }
        status
    }

    /// Days in the `max_days` window ending today that need a sync, oldest first
    ///
    /// A day needs syncing when it has no snapshot, when it is today, or
    /// when it is in the past but its snapshot was never finalized.
    pub fn days_needing_sync(&self, max_days: u32, now: DateTime<Utc>) -> SyncResult<Vec<DayKey>> {
        let today = self.calendar.day_key(now);
        let window = self.calendar.window_ending(today, max_days)?;
        let Some(first) = window.first().copied() else {
            return Ok(Vec::new());
        };

        let existing: HashMap<DayKey, bool> = self
            .snapshots
            .get_range(first, today)?
            .into_iter()
            .map(|s| (s.date, s.finalized))
            .collect();

        Ok(window
            .into_iter()
            .filter(|day| match existing.get(day) {
                None => true,
                Some(_) if *day == today => true,
                Some(finalized) => !finalized && *day < today,
            })
            .collect())
    }

    /// Backfill and refresh the `max_days` window ending today
    #[instrument(skip(self, now))]
    pub async fn sync_needed(&self, max_days: u32, now: DateTime<Utc>) -> SyncResult<SyncReport> {
        let _pass = self.pass_lock.lock().await;

        let days = self.days_needing_sync(max_days, now)?;
        let mut report = SyncReport::default();

        if days.is_empty() {
            let today = self.calendar.day_key(now);
            let (snapshot, failed) = self.sync_day(today, now).await?;
            report.latest_only = true;
            report.record(&snapshot, failed);
            return Ok(report);
        }

        for day in days {
            let (snapshot, failed) = self.sync_day(day, now).await?;
            report.record(&snapshot, failed);
        }

        info!(
            days = report.days_synced.len(),
            finalized = report.finalized.len(),
            failed_metrics = report.failed_metrics.len(),
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Refresh today only
    pub async fn sync_latest(&self, now: DateTime<Utc>) -> SyncResult<SyncReport> {
        let _pass = self.pass_lock.lock().await;

        let today = self.calendar.day_key(now);
        let (snapshot, failed) = self.sync_day(today, now).await?;
        let mut report = SyncReport {
            latest_only: true,
            ..Default::default()
        };
        report.record(&snapshot, failed);
        Ok(report)
    }

    /// Minutes slept the night before `reference`; `0` when the provider fails
    pub async fn last_night_sleep_minutes(&self, reference: DateTime<Utc>) -> u32 {
        let day = self.calendar.day_key(reference);
        let result = self
            .guarded(self.provider.last_night_sleep_minutes(reference))
            .await;
        additive(day, Metric::SleepMinutes, result, &mut Vec::new())
    }

    /// Fetch, store, and announce one day
    ///
    /// The window is `[day_start, min(day_end, now)]`; the snapshot is
    /// finalized only when that reaches the end of the day.
    pub async fn sync_day(
        &self,
        day: DayKey,
        now: DateTime<Utc>,
    ) -> SyncResult<(HealthSnapshot, Vec<Metric>)> {
        let start = self.calendar.day_start(day);
        let day_end = self.calendar.day_end(day);
        let end = day_end.min(now).max(start);

        let provider = &self.provider;
        let (steps, sleep_minutes, sleep, hrv, resting_hr, active_energy, mindful, respiratory, workouts) = tokio::join!(
            self.guarded(provider.daily_steps(start, end)),
            self.guarded(provider.sleep_minutes(start, end)),
            self.guarded(provider.sleep_details(start, end)),
            self.guarded(provider.daily_hrv_ms(start, end)),
            self.guarded(provider.daily_resting_heart_rate_bpm(start, end)),
            self.guarded(provider.daily_active_energy_kcal(start, end)),
            self.guarded(provider.daily_mindful_minutes(start, end)),
            self.guarded(provider.daily_respiratory_rate_brpm(start, end)),
            self.guarded(provider.daily_workouts_count(start, end)),
        );

        let mut failed = Vec::new();
        let mut snapshot = HealthSnapshot::new(day, now, provider.platform());
        snapshot.steps = additive(day, Metric::Steps, steps, &mut failed);
        snapshot.sleep_minutes = additive(day, Metric::SleepMinutes, sleep_minutes, &mut failed);
        snapshot.sleep = optional(day, Metric::SleepDetails, sleep, &mut failed);
        snapshot.metrics = WellnessMetrics {
            hrv_ms: optional(day, Metric::Hrv, hrv, &mut failed),
            resting_heart_rate_bpm: optional(day, Metric::RestingHeartRate, resting_hr, &mut failed),
            active_energy_kcal: optional(day, Metric::ActiveEnergy, active_energy, &mut failed),
            mindful_minutes: optional(day, Metric::MindfulMinutes, mindful, &mut failed),
            respiratory_rate_brpm: optional(day, Metric::RespiratoryRate, respiratory, &mut failed),
            workouts_count: optional(day, Metric::Workouts, workouts, &mut failed),
        };
        snapshot.finalized = end == day_end;

        self.snapshots.upsert(&snapshot)?;
        // No receivers is fine
        let _ = self.updates.send(snapshot.clone());

        debug!(
            day = %day,
            steps = snapshot.steps,
            sleep_minutes = snapshot.sleep_minutes,
            finalized = snapshot.finalized,
            failed = failed.len(),
            "Synced day"
        );
        Ok((snapshot, failed))
    }

    async fn guarded<T>(&self, call: impl Future<Output = ProviderResult<T>>) -> ProviderResult<T> {
        let timeout = self.config.provider_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(
                timeout.as_millis().try_into().unwrap_or(u64::MAX),
            )),
        }
    }
}

fn additive(day: DayKey, metric: Metric, result: ProviderResult<u32>, failed: &mut Vec<Metric>) -> u32 {
    result.unwrap_or_else(|e| {
        warn!(day = %day, metric = %metric, error = %e, "Metric unavailable; recording 0");
        failed.push(metric);
        0
    })
}

fn optional<T>(
    day: DayKey,
    metric: Metric,
    result: ProviderResult<Option<T>>,
    failed: &mut Vec<Metric>,
) -> Option<T> {
    result.unwrap_or_else(|e| {
        warn!(day = %day, metric = %metric, error = %e, "Metric unavailable; recording unknown");
        failed.push(metric);
        None
    })
}
