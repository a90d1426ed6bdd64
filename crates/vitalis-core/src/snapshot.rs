//! Daily health snapshot types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::DayKey;

/// Platform a snapshot was recorded on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Platform {
    Ios,
    Android,
    Mock,
    #[default]
    Unknown,
}

impl Platform {
    /// Lowercase name as shown to consumers
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Mock => "mock",
            Platform::Unknown => "unknown",
        }
    }
}

/// Detail of the main sleep session inside a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SleepDetails {
    /// Session start
    pub start: Option<DateTime<Utc>>,
    /// Session end (wake time)
    pub end: Option<DateTime<Utc>>,
    /// Minutes actually asleep
    pub asleep_minutes: u32,
    pub time_in_bed_minutes: Option<u32>,
    pub awakenings_count: Option<u32>,
    pub light_minutes: Option<u32>,
    pub deep_minutes: Option<u32>,
    pub rem_minutes: Option<u32>,
}

/// Optional wellness metrics for a day
///
/// Every field is independently nullable: `None` means the value is
/// unknown, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WellnessMetrics {
    pub hrv_ms: Option<f64>,
    pub resting_heart_rate_bpm: Option<f64>,
    pub active_energy_kcal: Option<f64>,
    pub mindful_minutes: Option<f64>,
    pub respiratory_rate_brpm: Option<f64>,
    pub workouts_count: Option<u32>,
}

/// One row per local calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Primary key
    pub date: DayKey,
    /// When this row was recorded
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub steps: u32,
    pub sleep_minutes: u32,
    /// The synced window covered the whole day
    pub finalized: bool,
    pub sleep: Option<SleepDetails>,
    pub metrics: WellnessMetrics,
}

impl HealthSnapshot {
    /// Empty, non-finalized snapshot for a day
    pub fn new(date: DayKey, timestamp: DateTime<Utc>, platform: Platform) -> Self {
        Self {
            date,
            timestamp,
            platform,
            steps: 0,
            sleep_minutes: 0,
            finalized: false,
            sleep: None,
            metrics: WellnessMetrics::default(),
        }
    }

    /// Wake time recorded by the sleep session, if any
    pub fn sleep_end(&self) -> Option<DateTime<Utc>> {
        self.sleep.as_ref().and_then(|s| s.end)
    }

    /// Sleep session start, if any
    pub fn sleep_start(&self) -> Option<DateTime<Utc>> {
        self.sleep.as_ref().and_then(|s| s.start)
    }

    /// Equality on everything except the recording timestamp
    pub fn same_values(&self, other: &HealthSnapshot) -> bool {
        self.date == other.date
            && self.platform == other.platform
            && self.steps == other.steps
            && self.sleep_minutes == other.sleep_minutes
            && self.finalized == other.finalized
            && self.sleep == other.sleep
            && self.metrics == other.metrics
    }
}
