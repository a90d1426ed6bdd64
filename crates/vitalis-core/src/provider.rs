//! Health provider capability interface
//!
//! One implementation exists per host platform; the engine consumes a
//! provider but never owns the platform's health store. Accessors fail
//! soft: counts the domain treats as additive come back as `0`, metrics
//! that may be unknown come back as `None`. An `Err` is reserved for
//! calls that threw or timed out, and callers degrade it the same way.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::snapshot::{Platform, SleepDetails};

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Unknown,
}

/// Individual metric accessors, used for logging and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Steps,
    SleepMinutes,
    SleepDetails,
    Hrv,
    RestingHeartRate,
    ActiveEnergy,
    MindfulMinutes,
    RespiratoryRate,
    Workouts,
}

impl Metric {
    /// All per-day accessors queried during a sync
    pub const ALL: [Metric; 9] = [
        Metric::Steps,
        Metric::SleepMinutes,
        Metric::SleepDetails,
        Metric::Hrv,
        Metric::RestingHeartRate,
        Metric::ActiveEnergy,
        Metric::MindfulMinutes,
        Metric::RespiratoryRate,
        Metric::Workouts,
    ];

    /// Whether the domain treats this metric as an additive count
    pub fn is_additive(&self) -> bool {
        matches!(self, Metric::Steps | Metric::SleepMinutes)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Steps => "steps",
            Metric::SleepMinutes => "sleep_minutes",
            Metric::SleepDetails => "sleep_details",
            Metric::Hrv => "hrv_ms",
            Metric::RestingHeartRate => "resting_heart_rate_bpm",
            Metric::ActiveEnergy => "active_energy_kcal",
            Metric::MindfulMinutes => "mindful_minutes",
            Metric::RespiratoryRate => "respiratory_rate_brpm",
            Metric::Workouts => "workouts_count",
        };
        f.write_str(name)
    }
}

/// Which provider implementation the engine should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic mock data
    #[default]
    Mock,
    /// The host platform's health store
    Platform,
}

/// Capability interface over a platform health store
///
/// All windows are half-open `[start, end)`.
#[async_trait]
pub trait HealthProvider: Send + Sync {
    /// Platform tag recorded on snapshots
    fn platform(&self) -> Platform;

    /// Whether a health store exists on this device
    async fn is_available(&self) -> bool;

    /// Ask the user for read access
    async fn request_permissions(&self) -> PermissionStatus;

    /// Step count in the window
    async fn daily_steps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ProviderResult<u32>;

    /// Minutes asleep in the window
    async fn sleep_minutes(&self, start: DateTime<Utc>, end: DateTime<Utc>)
    -> ProviderResult<u32>;

    /// Minutes asleep during the night preceding `reference`
    async fn last_night_sleep_minutes(&self, reference: DateTime<Utc>) -> ProviderResult<u32>;

    /// Main sleep session overlapping the window
    async fn sleep_details(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<SleepDetails>>;

    async fn daily_hrv_ms(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>>;

    async fn daily_resting_heart_rate_bpm(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>>;

    async fn daily_active_energy_kcal(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>>;

    async fn daily_mindful_minutes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>>;

    async fn daily_respiratory_rate_brpm(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<f64>>;

    async fn daily_workouts_count(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Option<u32>>;
}
