//! Observable energy state

use chrono::{DateTime, Duration, Utc};
use vitalis_core::{DayKey, HealthSnapshot, LocalCalendar};

/// Sleep data the day's baseline was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub sleep_minutes: u32,
    pub sleep_start: Option<DateTime<Utc>>,
    pub sleep_end: Option<DateTime<Utc>>,
}

impl Baseline {
    pub fn from_snapshot(snapshot: &HealthSnapshot) -> Self {
        Self {
            sleep_minutes: snapshot.sleep_minutes,
            sleep_start: snapshot.sleep_start(),
            sleep_end: snapshot.sleep_end(),
        }
    }

    /// When the baseline sleep ended, clamped into `[day_start, now]`
    ///
    /// Falls back to start + duration, then to day start + duration
    /// capped at `full_sleep_minutes`.
    pub fn wake_time(
        &self,
        calendar: &LocalCalendar,
        day: DayKey,
        now: DateTime<Utc>,
        full_sleep_minutes: f64,
    ) -> DateTime<Utc> {
        let day_start = calendar.day_start(day);
        let duration = Duration::minutes(i64::from(self.sleep_minutes));

        let wake = self
            .sleep_end
            .or_else(|| self.sleep_start.map(|start| start + duration))
            .unwrap_or_else(|| {
                let capped = (self.sleep_minutes as f64).min(full_sleep_minutes.max(0.0));
                day_start + Duration::minutes(capped as i64)
            });

        wake.max(day_start).min(now.max(day_start))
    }
}

/// Current energy, shared through a watch channel
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyState {
    /// `None` iff today's baseline sleep is unknown
    pub energy_pct: Option<f64>,
    pub current_day: DayKey,
    pub last_update: DateTime<Utc>,
    /// Nap minutes already converted to energy today
    pub accounted_nap_minutes: u32,
    pub baseline: Option<Baseline>,
}

impl EnergyState {
    /// Fresh state for `day` with no baseline
    pub fn empty(day: DayKey, now: DateTime<Utc>) -> Self {
        Self {
            energy_pct: None,
            current_day: day,
            last_update: now,
            accounted_nap_minutes: 0,
            baseline: None,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}

/// Clamp into the valid percentage range
pub fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}
