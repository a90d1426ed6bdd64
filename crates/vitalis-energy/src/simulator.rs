//! Energy simulator
//!
//! The value starts from last night's sleep, drains with every awake
//! minute, gains from naps found later in the day, and resets at local
//! midnight. All mutation goes through the watch sender, which serializes
//! writers; every write clamps to `[0, 100]`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use vitalis_core::{Clock, HealthProvider, HealthSnapshot, LocalCalendar, ProviderError};
use vitalis_storage::SnapshotRepository;

use crate::config::EnergyConfig;
use crate::error::EnergyResult;
use crate::state::{Baseline, EnergyState, clamp_pct};
use crate::tasks::EnergyTasks;

/// Owns the energy state and the rules that move it
pub struct EnergySimulator {
    config: EnergyConfig,
    calendar: LocalCalendar,
    clock: Arc<dyn Clock>,
    provider: Arc<dyn HealthProvider>,
    snapshots: SnapshotRepository,
    state: watch::Sender<EnergyState>,
}

impl EnergySimulator {
    pub fn new(
        config: EnergyConfig,
        calendar: LocalCalendar,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn HealthProvider>,
        snapshots: SnapshotRepository,
    ) -> Self {
        let now = clock.now();
        let (state, _) = watch::channel(EnergyState::empty(calendar.day_key(now), now));
        Self {
            config,
            calendar,
            clock,
            provider,
            snapshots,
            state,
        }
    }

    pub fn config(&self) -> &EnergyConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current value; `None` means no baseline for today
    pub fn energy_pct(&self) -> Option<f64> {
        self.state.borrow().energy_pct
    }

    /// Copy of the full state
    pub fn state(&self) -> EnergyState {
        self.state.borrow().clone()
    }

    /// Observe every state change
    pub fn subscribe(&self) -> watch::Receiver<EnergyState> {
        self.state.subscribe()
    }

    /// Derive the baseline from `snapshot`
    ///
    /// Only a snapshot for the current day with known, non-zero sleep
    /// establishes a baseline. Returns whether it did.
    pub fn establish_baseline(&self, snapshot: &HealthSnapshot, now: DateTime<Utc>) -> bool {
        if snapshot.sleep_minutes == 0 {
            return false;
        }
        let initial = clamp_pct(self.config.sleep_to_pct(f64::from(snapshot.sleep_minutes)));

        let established = self.state.send_if_modified(|state| {
            if snapshot.date != state.current_day {
                return false;
            }
            state.energy_pct = Some(initial);
            state.baseline = Some(Baseline::from_snapshot(snapshot));
            state.accounted_nap_minutes = 0;
            state.last_update = now;
            true
        });

        if established {
            info!(
                day = %snapshot.date,
                sleep_minutes = snapshot.sleep_minutes,
                energy_pct = initial,
                "Energy baseline established"
            );
        }
        established
    }

    /// Apply today's stored snapshot, if there is one
    pub fn load_baseline(&self, now: DateTime<Utc>) -> EnergyResult<bool> {
        let today = self.calendar.day_key(now);
        match self.snapshots.get_by_date(today)? {
            Some(snapshot) => Ok(self.apply_snapshot(&snapshot, now)),
            None => Ok(false),
        }
    }

    /// React to a freshly synced snapshot
    pub fn on_snapshot(&self, snapshot: &HealthSnapshot) -> bool {
        self.apply_snapshot(snapshot, self.clock.now())
    }

    /// Establish the baseline, or revise an existing one
    pub fn apply_snapshot(&self, snapshot: &HealthSnapshot, now: DateTime<Utc>) -> bool {
        if self.state.borrow().has_baseline() {
            self.revise_baseline(snapshot)
        } else {
            self.establish_baseline(snapshot, now)
        }
    }

    /// Replace today's baseline with a snapshot that reports more sleep
    ///
    /// Only the extra sleep is added to the live value, so drain since the
    /// first baseline is kept. Once a nap has been credited the baseline is
    /// frozen: the snapshot's total would count that nap a second time.
    pub fn revise_baseline(&self, snapshot: &HealthSnapshot) -> bool {
        let mut gained = 0.0;
        let revised = self.state.send_if_modified(|state| {
            let Some(baseline) = &state.baseline else {
                return false;
            };
            if snapshot.date != state.current_day
                || state.accounted_nap_minutes > 0
                || snapshot.sleep_minutes <= baseline.sleep_minutes
            {
                return false;
            }
            gained = self
                .config
                .sleep_to_pct(f64::from(snapshot.sleep_minutes - baseline.sleep_minutes));
            if let Some(pct) = state.energy_pct {
                state.energy_pct = Some(clamp_pct(pct + gained));
            }
            state.baseline = Some(Baseline::from_snapshot(snapshot));
            true
        });

        if revised {
            info!(
                day = %snapshot.date,
                sleep_minutes = snapshot.sleep_minutes,
                gained,
                "Energy baseline revised"
            );
        }
        revised
    }

    /// Drain by the awake minutes since the last update
    pub fn deplete_tick(&self, now: DateTime<Utc>) -> Option<f64> {
        let rate = self.config.depletion_rate_per_minute;
        let mut value = None;
        self.state.send_modify(|state| {
            let elapsed = (now - state.last_update).num_milliseconds().max(0) as f64 / 60_000.0;
            if let Some(pct) = state.energy_pct {
                state.energy_pct = Some(clamp_pct(pct - elapsed * rate));
            }
            state.last_update = state.last_update.max(now);
            value = state.energy_pct;
        });
        value
    }

    /// Reset at local midnight; returns whether the day changed
    pub fn check_rollover(&self, now: DateTime<Utc>) -> EnergyResult<bool> {
        let today = self.calendar.day_key(now);
        let changed = self.state.send_if_modified(|state| {
            if state.current_day == today {
                return false;
            }
            *state = EnergyState::empty(today, now);
            true
        });

        if changed {
            info!(day = %today, "Day rolled over; energy reset");
            self.load_baseline(now)?;
        }
        Ok(changed)
    }

    /// Convert sleep found after today's wake time into energy
    ///
    /// Returns the bonus in percentage points, `0.0` when nothing new was
    /// found, or `None` when there is no baseline to add to.
    pub async fn poll_naps(&self, now: DateTime<Utc>) -> EnergyResult<Option<f64>> {
        let (day, baseline) = {
            let state = self.state.borrow();
            match &state.baseline {
                Some(baseline) => (state.current_day, baseline.clone()),
                None => return Ok(None),
            }
        };

        let wake = baseline.wake_time(&self.calendar, day, now, self.config.full_sleep_minutes);
        let day_end = self.calendar.day_end(day);
        if wake >= day_end {
            return Ok(Some(0.0));
        }

        let timeout = self.config.provider_timeout();
        let minutes = match tokio::time::timeout(timeout, self.provider.sleep_minutes(wake, day_end)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProviderError::Timeout(
                    timeout.as_millis().try_into().unwrap_or(u64::MAX),
                )
                .into());
            }
        };

        let mut bonus = 0.0;
        self.state.send_if_modified(|state| {
            // The day may have rolled over while the query ran
            if state.current_day != day || minutes <= state.accounted_nap_minutes {
                return false;
            }
            let delta = minutes - state.accounted_nap_minutes;
            bonus = self.config.sleep_to_pct(f64::from(delta));
            if let Some(pct) = state.energy_pct {
                state.energy_pct = Some(clamp_pct(pct + bonus));
            }
            state.accounted_nap_minutes = minutes;
            true
        });

        if bonus > 0.0 {
            debug!(nap_minutes = minutes, bonus, "Nap top-up applied");
        }
        Ok(Some(bonus))
    }

    /// When energy will fall to `threshold` at the current drain rate
    ///
    /// `None` without a baseline or when it never will.
    pub fn predict_crossing(&self, threshold: f64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let pct = self.energy_pct()?;
        if pct <= threshold {
            return Some(now);
        }
        let rate = self.config.depletion_rate_per_minute;
        if rate <= 0.0 {
            return None;
        }
        let minutes = (pct - threshold) / rate;
        Some(now + Duration::milliseconds((minutes * 60_000.0).round() as i64))
    }

    /// Start the periodic tasks
    ///
    /// With `snapshots`, the simulator also establishes the baseline as
    /// soon as today's snapshot is synced.
    pub fn spawn(
        self: &Arc<Self>,
        snapshots: Option<broadcast::Receiver<HealthSnapshot>>,
    ) -> EnergyTasks {
        let now = self.clock.now();
        if let Err(e) = self.check_rollover(now).and_then(|_| self.load_baseline(now)) {
            warn!(error = %e, "Failed to load energy baseline");
        }
        EnergyTasks::spawn(self.clone(), snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use vitalis_core::{
        DayKey, ManualClock, Metric, MockHealthProvider, Platform, SleepDetails, SleepSession,
    };
    use vitalis_crypto::{KeyOrigin, StoreKey};
    use vitalis_storage::{EncryptedStore, StoreConfig};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, m, 0).unwrap()
    }

    fn day(d: u32) -> DayKey {
        DayKey::from_ymd(2024, 5, d).unwrap()
    }

    struct Fixture {
        _temp: TempDir,
        clock: Arc<ManualClock>,
        provider: Arc<MockHealthProvider>,
        snapshots: SnapshotRepository,
        sim: Arc<EnergySimulator>,
    }

    fn fixture(config: EnergyConfig, provider: MockHealthProvider) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = EncryptedStore::open(
            StoreConfig::with_path(temp.path().join("vitalis.redb")),
            StoreKey::generate(),
            KeyOrigin::Created,
        )
        .unwrap();
        let snapshots = SnapshotRepository::new(Arc::new(store));
        let clock = Arc::new(ManualClock::new(at(10, 8, 0)));
        let provider = Arc::new(provider);
        let sim = Arc::new(EnergySimulator::new(
            config,
            LocalCalendar::utc(),
            clock.clone(),
            provider.clone(),
            snapshots.clone(),
        ));
        Fixture {
            _temp: temp,
            clock,
            provider,
            snapshots,
            sim,
        }
    }

    fn slept(d: u32, minutes: u32, end: Option<DateTime<Utc>>) -> HealthSnapshot {
        let mut snapshot = HealthSnapshot::new(day(d), at(d, 8, 0), Platform::Mock);
        snapshot.sleep_minutes = minutes;
        snapshot.sleep = end.map(|end| SleepDetails {
            start: Some(end - Duration::minutes(i64::from(minutes))),
            end: Some(end),
            asleep_minutes: minutes,
            ..Default::default()
        });
        snapshot
    }

    fn no_sleep_provider() -> MockHealthProvider {
        MockHealthProvider::new(LocalCalendar::utc()).with_sleep_sessions(Vec::new())
    }

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_full_sleep_then_an_hour_awake() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());

        assert!(f.sim.establish_baseline(&slept(10, 480, None), at(10, 8, 0)));
        assert!(approx(f.sim.energy_pct(), 100.0));

        f.clock.advance_minutes(60);
        let value = f.sim.deplete_tick(f.clock.now());
        assert!(approx(value, 97.0));
    }

    #[test]
    fn test_null_without_baseline() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        assert!(f.sim.energy_pct().is_none());

        // Zero sleep does not establish a baseline
        assert!(!f.sim.establish_baseline(&slept(10, 0, None), at(10, 8, 0)));
        f.clock.advance_minutes(30);
        assert!(f.sim.deplete_tick(f.clock.now()).is_none());

        // Neither does another day's snapshot
        assert!(!f.sim.establish_baseline(&slept(9, 420, None), at(10, 8, 0)));
        assert!(f.sim.energy_pct().is_none());
    }

    #[test]
    fn test_partial_sleep_baseline() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        f.sim.establish_baseline(&slept(10, 240, None), at(10, 8, 0));
        assert!(approx(f.sim.energy_pct(), 50.0));

        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        f.sim.establish_baseline(&slept(10, 600, None), at(10, 8, 0));
        assert!(approx(f.sim.energy_pct(), 100.0));
    }

    #[test]
    fn test_depletion_stops_at_zero() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        f.sim.establish_baseline(&slept(10, 60, None), at(10, 8, 0));

        for _ in 0..20 {
            f.clock.advance_minutes(30);
            let value = f.sim.deplete_tick(f.clock.now()).unwrap();
            assert!((0.0..=100.0).contains(&value));
        }
        assert!(approx(f.sim.energy_pct(), 0.0));
    }

    #[test]
    fn test_later_snapshot_keeps_depletion() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        assert!(f.sim.on_snapshot(&slept(10, 480, None)));
        f.clock.advance_minutes(100);
        f.sim.deplete_tick(f.clock.now());

        assert!(!f.sim.on_snapshot(&slept(10, 480, None)));
        assert!(approx(f.sim.energy_pct(), 95.0));
    }

    #[test]
    fn test_fuller_night_revises_partial_baseline() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());

        // Synced a few minutes after midnight
        f.clock.set(at(10, 0, 20));
        assert!(f.sim.on_snapshot(&slept(10, 15, Some(at(10, 0, 15)))));
        assert!(approx(f.sim.energy_pct(), 3.125));

        // Awake for ten minutes drains half a point
        f.clock.set(at(10, 0, 30));
        f.sim.deplete_tick(f.clock.now());

        // The full night arrives with the morning sync
        f.clock.set(at(10, 8, 0));
        f.snapshots.upsert(&slept(10, 456, Some(at(10, 7, 36)))).unwrap();
        assert!(f.sim.load_baseline(f.clock.now()).unwrap());
        assert!(approx(f.sim.energy_pct(), 3.125 - 0.5 + 91.875));
        assert_eq!(f.sim.state().baseline.unwrap().sleep_minutes, 456);

        // Less sleep never lowers the baseline
        assert!(!f.sim.on_snapshot(&slept(10, 300, None)));
        assert_eq!(f.sim.state().baseline.unwrap().sleep_minutes, 456);
    }

    #[tokio::test]
    async fn test_baseline_frozen_after_nap_credit() {
        let provider = MockHealthProvider::new(LocalCalendar::utc())
            .with_sleep_sessions(vec![SleepSession::new(at(9, 23, 0), 420)]);
        let f = fixture(EnergyConfig::default(), provider);
        f.sim
            .establish_baseline(&slept(10, 420, Some(at(10, 6, 0))), at(10, 8, 0));

        f.provider.add_sleep_session(SleepSession::new(at(10, 13, 0), 48));
        f.clock.set(at(10, 14, 0));
        f.sim.poll_naps(f.clock.now()).await.unwrap();
        let credited = f.sim.energy_pct().unwrap();

        // A later sync includes the nap in the day total
        assert!(!f.sim.on_snapshot(&slept(10, 468, Some(at(10, 13, 48)))));
        assert!(approx(f.sim.energy_pct(), credited));
    }

    #[test]
    fn test_rollover_resets_and_reloads() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        f.sim.establish_baseline(&slept(10, 480, None), at(10, 8, 0));

        // Same day: nothing happens
        assert!(!f.sim.check_rollover(at(10, 23, 59)).unwrap());

        // Next day without a stored snapshot: no baseline
        f.clock.set(at(11, 0, 1));
        assert!(f.sim.check_rollover(f.clock.now()).unwrap());
        let state = f.sim.state();
        assert_eq!(state.current_day, day(11));
        assert!(state.energy_pct.is_none());
        assert_eq!(state.accounted_nap_minutes, 0);

        // The following day's snapshot is already stored
        f.snapshots.upsert(&slept(12, 360, None)).unwrap();
        f.clock.set(at(12, 6, 0));
        assert!(f.sim.check_rollover(f.clock.now()).unwrap());
        assert!(approx(f.sim.energy_pct(), 75.0));
    }

    #[tokio::test]
    async fn test_nap_adds_to_live_value() {
        let provider = MockHealthProvider::new(LocalCalendar::utc()).with_sleep_sessions(vec![
            SleepSession::new(at(9, 23, 0), 420),
        ]);
        let f = fixture(EnergyConfig::default(), provider);

        f.sim
            .establish_baseline(&slept(10, 420, Some(at(10, 6, 0))), at(10, 8, 0));
        f.clock.set(at(10, 14, 0));
        f.sim.deplete_tick(f.clock.now());
        let before = f.sim.energy_pct().unwrap();

        // Nothing since waking
        assert_eq!(f.sim.poll_naps(f.clock.now()).await.unwrap(), Some(0.0));

        // A 48 minute nap after lunch is worth 10 points
        f.provider.add_sleep_session(SleepSession::new(at(10, 14, 30), 48));
        f.clock.set(at(10, 15, 30));
        let bonus = f.sim.poll_naps(f.clock.now()).await.unwrap().unwrap();
        assert!((bonus - 10.0).abs() < 1e-9);
        assert!(approx(f.sim.energy_pct(), before + 10.0));
        assert_eq!(f.sim.state().accounted_nap_minutes, 48);

        // Polling again adds nothing
        assert_eq!(f.sim.poll_naps(f.clock.now()).await.unwrap(), Some(0.0));
    }

    #[tokio::test]
    async fn test_nap_without_baseline_is_ignored() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        assert_eq!(f.sim.poll_naps(f.clock.now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nap_query_failure_surfaces() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        f.sim.establish_baseline(&slept(10, 480, None), at(10, 8, 0));
        f.provider.fail_metric(Metric::SleepMinutes);

        assert!(f.sim.poll_naps(f.clock.now()).await.is_err());
        assert!(approx(f.sim.energy_pct(), 100.0));
    }

    #[test]
    fn test_predict_crossing() {
        let f = fixture(EnergyConfig::default(), no_sleep_provider());
        assert!(f.sim.predict_crossing(20.0, at(10, 8, 0)).is_none());

        f.sim.establish_baseline(&slept(10, 480, None), at(10, 8, 0));
        // 80 points at 0.05 per minute
        assert_eq!(
            f.sim.predict_crossing(20.0, at(10, 8, 0)),
            Some(at(10, 8, 0) + Duration::minutes(1600))
        );
        assert_eq!(f.sim.predict_crossing(100.0, at(10, 8, 0)), Some(at(10, 8, 0)));

        let still = fixture(EnergyConfig::default().with_depletion_rate(0.0), no_sleep_provider());
        still.sim.establish_baseline(&slept(10, 480, None), at(10, 8, 0));
        assert!(still.sim.predict_crossing(20.0, at(10, 8, 0)).is_none());
    }

    #[test]
    fn test_bounds_hold_under_mixed_updates() {
        let f = fixture(EnergyConfig::default().with_depletion_rate(0.7), no_sleep_provider());
        f.sim.establish_baseline(&slept(10, 470, None), at(10, 8, 0));
        let mut rx = f.sim.subscribe();

        for step in 0..50 {
            f.clock.advance_minutes(7 + step % 5);
            f.sim.deplete_tick(f.clock.now());
            let pct = rx.borrow_and_update().energy_pct.unwrap();
            assert!((0.0..=100.0).contains(&pct));
        }
    }
}
