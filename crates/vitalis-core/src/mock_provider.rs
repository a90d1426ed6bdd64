//! Deterministic health provider for tests and hosts without a health store
//!
//! Values are derived from a seed and the calendar day, so the same
//! window always yields the same numbers. Additive metrics scale with
//! the covered fraction of each day, which makes partial-day syncs look
//! like real same-day accrual.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vitalis_core::{LocalCalendar, Metric, MockHealthProvider};
//!
//! let provider = MockHealthProvider::new(LocalCalendar::utc())
//!     .with_seed(7);
//!
//! // Make HRV throw for one day
//! provider.fail_metric_on(Metric::Hrv, day);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use parking_lot::Mutex;

use crate::calendar::{DayKey, LocalCalendar};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{HealthProvider, Metric, PermissionStatus};
use crate::snapshot::{Platform, SleepDetails};

/// A contiguous block of sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepSession {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SleepSession {
    /// Session from `start` lasting `minutes`
    pub fn new(start: DateTime<Utc>, minutes: i64) -> Self {
        Self {
            start,
            end: start + Duration::minutes(minutes),
        }
    }

    /// Length in minutes
    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }

    /// Minutes of this session inside `[start, end)`
    pub fn overlap_minutes(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let from = self.start.max(start);
        let to = self.end.min(end);
        (to - from).num_minutes().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fault {
    metric: Metric,
    day: Option<DayKey>,
}

/// Deterministic, seedable provider with fault injection
pub struct MockHealthProvider {
    calendar: LocalCalendar,
    seed: u64,
    available: bool,
    permission: PermissionStatus,
    /// Explicit sleep sessions; generated nightly sessions when `None`
    sessions: Mutex<Option<Vec<SleepSession>>>,
    faults: Mutex<Vec<Fault>>,
    latency: Mutex<HashMap<Metric, StdDuration>>,
    calls: AtomicU64,
}

impl MockHealthProvider {
    /// Provider with default seed and granted permissions
    pub fn new(calendar: LocalCalendar) -> Self {
        Self {
            calendar,
            seed: 0x5EED_0001,
            available: true,
            permission: PermissionStatus::Granted,
            sessions: Mutex::new(None),
            faults: Mutex::new(Vec::new()),
            latency: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Change the data seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the permission the user "grants"
    pub fn with_permission(mut self, permission: PermissionStatus) -> Self {
        self.permission = permission;
        self
    }

    /// Simulate a device without a health store
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Replace generated sleep with explicit sessions
    pub fn with_sleep_sessions(self, sessions: Vec<SleepSession>) -> Self {
        *self.sessions.lock() = Some(sessions);
        self
    }

    /// Record an extra session (e.g. a nap) discovered later
    pub fn add_sleep_session(&self, session: SleepSession) {
        let mut sessions = self.sessions.lock();
        sessions.get_or_insert_with(Vec::new).push(session);
    }

    /// Make a metric fail for every window
    pub fn fail_metric(&self, metric: Metric) {
        self.faults.lock().push(Fault { metric, day: None });
    }

    /// Make a metric fail for windows starting on `day`
    pub fn fail_metric_on(&self, metric: Metric, day: DayKey) {
        self.faults.lock().push(Fault {
            metric,
            day: Some(day),
        });
    }

    /// Remove all injected failures
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Delay every call to `metric`
    pub fn with_latency(self, metric: Metric, delay: StdDuration) -> Self {
        self.latency.lock().insert(metric, delay);
        self
    }

    /// Number of accessor calls served so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// The nightly session generated for the night leading into `day`
    pub fn generated_session(&self, day: DayKey) -> SleepSession {
        let h = self.hash(day, 11);
        // Bedtime between 23:00 and 23:59 the evening before
        let start = self.calendar.day_start(day) - Duration::minutes(60) + Duration::minutes((h % 60) as i64);
        // Six to eight and a half hours
        let minutes = 360 + (self.hash(day, 12) % 150) as i64;
        SleepSession::new(start, minutes)
    }

    fn hash(&self, day: DayKey, salt: u64) -> u64 {
        let ordinal = day.date().num_days_from_ce() as u64;
        splitmix64(self.seed ^ ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt)
    }

    fn readable(&self) -> bool {
        self.available && self.permission == PermissionStatus::Granted
    }

    /// Shared preamble: counting, latency, fault injection
    async fn enter(&self, metric: Metric, start: DateTime<Utc>) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let delay = self.latency.lock().get(&metric).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let day = self.calendar.day_key(start);
        let failing = self
            .faults
            .lock()
            .iter()
            .any(|f| f.metric == metric && f.day.is_none_or(|d| d == day));
        if failing {
            return Err(ProviderError::Query(format!("injected failure: {metric}")));
        }
        Ok(())
    }

    /// Days whose local span intersects `[start, end)`
    fn days_touching(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DayKey> {
        let first = self.calendar.day_key(start);
        let last = self.calendar.day_key(end - Duration::seconds(1));
        let span = first.days_until(&last).max(0);
        (0..=span).map(|i| first.offset_days(i)).collect()
    }

    fn sessions_near(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SleepSession> {
        if let Some(explicit) = self.sessions.lock().as_ref() {
            return explicit.clone();
        }
        // A night's session begins the evening before its day, so look one day ahead
        let mut days = self.days_touching(start, end);
        if let Some(last) = days.last().copied() {
            days.push(last.succ());
        }
        days.into_iter().map(|d| self.generated_session(d)).collect()
    }

    fn asleep_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
        self.sessions_near(start, end)
            .iter()
            .map(|s| s.overlap_minutes(start, end))
            .sum::<i64>()
            .clamp(0, i64::from(u32::MAX)) as u32
    }

    /// Spread a per-day total over the covered fraction of each day
    fn prorated(&self, start: DateTime<Utc>, end: DateTime<Utc>, daily: impl Fn(DayKey) -> f64) -> f64 {
        self.days_touching(start, end)
            .into_iter()
            .map(|day| {
                let from = self.calendar.day_start(day).max(start);
                let to = self.calendar.day_end(day).min(end);
                let covered = (to - from).num_minutes().max(0) as f64;
                let length = self.calendar.day_minutes(day).max(1) as f64;
                daily(day) * covered / length
            })
            .sum()
    }

    fn per_day(&self, start: DateTime<Utc>, end: DateTime<Utc>, salt: u64) -> Option<u64> {
        if end <= start {
            return None;
        }
        Some(self.hash(self.calendar.day_key(start), salt))
    }
}

/// SplitMix64 finalizer
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[async_trait]
impl HealthProvider for MockHealthProvider {
    fn platform(&self) -> Platform {
        Platform::Mock
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn request_permissions(&self) -> PermissionStatus {
        if !self.available {
            return PermissionStatus::Unknown;
        }
        self.permission
    }

    async fn daily_steps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<u32> {
        self.enter(Metric::Steps, start).await?;
        if !self.readable() || end <= start {
            return Ok(0);
        }
        let steps = self.prorated(start, end, |day| 3_000.0 + (self.hash(day, 1) % 9_000) as f64);
        Ok(steps.floor() as u32)
    }

    async fn sleep_minutes(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<u32> {
        self.enter(Metric::SleepMinutes, start).await?;
        if !self.readable() || end <= start {
            return Ok(0);
        }
        Ok(self.asleep_in(start, end))
    }

    async fn last_night_sleep_minutes(&self, reference: DateTime<Utc>) -> ProviderResult<u32> {
        self.enter(Metric::SleepMinutes, reference).await?;
        if !self.readable() {
            return Ok(0);
        }
        let day_start = self.calendar.day_start(self.calendar.day_key(reference));
        let from = day_start - Duration::hours(6);
        let to = (day_start + Duration::hours(12)).min(reference);
        if to <= from {
            return Ok(0);
        }
        Ok(self.asleep_in(from, to))
    }

    async fn sleep_details(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<SleepDetails>> {
        self.enter(Metric::SleepDetails, start).await?;
        if !self.readable() || end <= start {
            return Ok(None);
        }

        let main = self
            .sessions_near(start, end)
            .into_iter()
            .filter(|s| s.overlap_minutes(start, end) > 0)
            .max_by_key(|s| s.overlap_minutes(start, end));

        Ok(main.map(|session| {
            let day = self.calendar.day_key(session.end);
            let asleep = session.minutes() as u32;
            let light = asleep * 55 / 100;
            let deep = asleep * 20 / 100;
            SleepDetails {
                start: Some(session.start),
                end: Some(session.end),
                asleep_minutes: asleep,
                time_in_bed_minutes: Some(asleep + 10 + (self.hash(day, 21) % 20) as u32),
                awakenings_count: Some((self.hash(day, 22) % 4) as u32),
                light_minutes: Some(light),
                deep_minutes: Some(deep),
                rem_minutes: Some(asleep - light - deep),
            }
        }))
    }

    async fn daily_hrv_ms(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>> {
        self.enter(Metric::Hrv, start).await?;
        if !self.readable() {
            return Ok(None);
        }
        Ok(self.per_day(start, end, 2).map(|h| 35.0 + (h % 40) as f64))
    }

    async fn daily_resting_heart_rate_bpm(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>> {
        self.enter(Metric::RestingHeartRate, start).await?;
        if !self.readable() {
            return Ok(None);
        }
        Ok(self.per_day(start, end, 3).map(|h| 52.0 + (h % 16) as f64))
    }

    async fn daily_active_energy_kcal(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>> {
        self.enter(Metric::ActiveEnergy, start).await?;
        if !self.readable() || end <= start {
            return Ok(None);
        }
        let kcal = self.prorated(start, end, |day| 250.0 + (self.hash(day, 4) % 450) as f64);
        Ok(Some(kcal.round()))
    }

    async fn daily_mindful_minutes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>> {
        self.enter(Metric::MindfulMinutes, start).await?;
        if !self.readable() {
            return Ok(None);
        }
        Ok(self.per_day(start, end, 5).map(|h| (h % 25) as f64))
    }

    async fn daily_respiratory_rate_brpm(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>> {
        self.enter(Metric::RespiratoryRate, start).await?;
        if !self.readable() {
            return Ok(None);
        }
        Ok(self.per_day(start, end, 6).map(|h| 12.0 + (h % 60) as f64 / 10.0))
    }

    async fn daily_workouts_count(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<u32>> {
        self.enter(Metric::Workouts, start).await?;
        if !self.readable() {
            return Ok(None);
        }
        Ok(self.per_day(start, end, 7).map(|h| (h % 3) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn provider() -> MockHealthProvider {
        MockHealthProvider::new(LocalCalendar::utc())
    }

    fn day() -> DayKey {
        DayKey::from_ymd(2024, 4, 10).unwrap()
    }

    #[tokio::test]
    async fn test_values_are_deterministic() {
        let p = provider();
        let cal = LocalCalendar::utc();
        let (start, end) = (cal.day_start(day()), cal.day_end(day()));

        let a = p.daily_steps(start, end).await.unwrap();
        let b = p.daily_steps(start, end).await.unwrap();
        assert_eq!(a, b);
        assert!(a >= 3_000);

        let hrv = p.daily_hrv_ms(start, end).await.unwrap();
        assert_eq!(hrv, p.daily_hrv_ms(start, end).await.unwrap());
        assert!(hrv.is_some());
    }

    #[tokio::test]
    async fn test_partial_day_accrues_less() {
        let p = provider();
        let cal = LocalCalendar::utc();
        let start = cal.day_start(day());
        let full = p.daily_steps(start, cal.day_end(day())).await.unwrap();
        let half = p.daily_steps(start, start + Duration::hours(12)).await.unwrap();
        assert!(half < full);
        assert!(half > 0);
    }

    #[tokio::test]
    async fn test_night_sleep_lands_on_day() {
        let p = provider();
        let cal = LocalCalendar::utc();
        let minutes = p
            .sleep_minutes(cal.day_start(day()), cal.day_end(day()))
            .await
            .unwrap();
        // Most of last night plus up to an hour of the next evening's bedtime
        assert!((300..=570).contains(&minutes), "got {minutes}");

        let details = p
            .sleep_details(cal.day_start(day()), cal.day_end(day()))
            .await
            .unwrap()
            .unwrap();
        assert!(details.end.unwrap() > cal.day_start(day()));
        assert_eq!(
            details.light_minutes.unwrap() + details.deep_minutes.unwrap() + details.rem_minutes.unwrap(),
            details.asleep_minutes
        );
    }

    #[tokio::test]
    async fn test_fault_injection_per_day() {
        let p = provider();
        let cal = LocalCalendar::utc();
        p.fail_metric_on(Metric::Hrv, day());

        let failing = p.daily_hrv_ms(cal.day_start(day()), cal.day_end(day())).await;
        assert!(matches!(failing, Err(ProviderError::Query(_))));

        let other = day().succ();
        assert!(p.daily_hrv_ms(cal.day_start(other), cal.day_end(other)).await.is_ok());

        p.clear_faults();
        assert!(p.daily_hrv_ms(cal.day_start(day()), cal.day_end(day())).await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_permission_fails_soft() {
        let p = provider().with_permission(PermissionStatus::Denied);
        let cal = LocalCalendar::utc();
        let (start, end) = (cal.day_start(day()), cal.day_end(day()));

        assert_eq!(p.request_permissions().await, PermissionStatus::Denied);
        assert_eq!(p.daily_steps(start, end).await.unwrap(), 0);
        assert_eq!(p.daily_hrv_ms(start, end).await.unwrap(), None);
        assert_eq!(p.daily_workouts_count(start, end).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_explicit_sessions_and_naps() {
        let cal = LocalCalendar::utc();
        let night = SleepSession::new(Utc.with_ymd_and_hms(2024, 4, 9, 23, 0, 0).unwrap(), 480);
        let p = provider().with_sleep_sessions(vec![night]);

        let wake = night.end;
        let before = p.sleep_minutes(wake, cal.day_end(day())).await.unwrap();
        assert_eq!(before, 0);

        p.add_sleep_session(SleepSession::new(wake + Duration::hours(6), 30));
        let after = p.sleep_minutes(wake, cal.day_end(day())).await.unwrap();
        assert_eq!(after, 30);
    }

    #[tokio::test]
    async fn test_unavailable_provider() {
        let p = provider().unavailable();
        assert!(!p.is_available().await);
        assert_eq!(p.request_permissions().await, PermissionStatus::Unknown);
    }
}
