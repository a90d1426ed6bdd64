//! Reconciler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the health sync reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rolling window kept populated, in days, today included
    pub window_days: u32,
    /// Per-accessor timeout in milliseconds; a timeout counts as a failure
    pub provider_timeout_ms: u64,
    /// Period of the background sync in seconds; 0 disables it
    pub periodic_interval_secs: u64,
    /// Capacity of the snapshot update channel
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_days: 14,
            provider_timeout_ms: 10_000,
            periodic_interval_secs: 15 * 60,
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// `None` when periodic sync is disabled
    pub fn periodic_interval(&self) -> Option<Duration> {
        (self.periodic_interval_secs > 0).then(|| Duration::from_secs(self.periodic_interval_secs))
    }

    /// Set the rolling window
    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    /// Set the per-accessor timeout
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Set the background period; `None` disables it
    pub fn with_periodic_interval(mut self, interval: Option<Duration>) -> Self {
        self.periodic_interval_secs = interval.map(|d| d.as_secs()).unwrap_or(0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.window_days, 14);
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert_eq!(config.periodic_interval(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_disable_periodic() {
        let config = SyncConfig::default().with_periodic_interval(None);
        assert!(config.periodic_interval().is_none());
    }
}
