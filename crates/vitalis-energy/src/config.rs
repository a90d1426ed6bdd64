//! Energy simulator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the energy simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Sleep that yields a full 100% baseline
    pub full_sleep_minutes: f64,
    /// Percentage points lost per awake minute
    pub depletion_rate_per_minute: f64,
    /// Depletion tick period in seconds
    pub tick_interval_secs: u64,
    /// Day rollover check period in seconds
    pub rollover_check_secs: u64,
    /// Nap poll period in seconds
    pub nap_poll_secs: u64,
    /// Timeout for the nap query in milliseconds
    pub provider_timeout_ms: u64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            full_sleep_minutes: 480.0,
            depletion_rate_per_minute: 0.05,
            tick_interval_secs: 60,
            rollover_check_secs: 60,
            nap_poll_secs: 60,
            provider_timeout_ms: 10_000,
        }
    }
}

impl EnergyConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn rollover_check_interval(&self) -> Duration {
        Duration::from_secs(self.rollover_check_secs.max(1))
    }

    pub fn nap_poll_interval(&self) -> Duration {
        Duration::from_secs(self.nap_poll_secs.max(1))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Set the full-sleep constant
    pub fn with_full_sleep_minutes(mut self, minutes: f64) -> Self {
        self.full_sleep_minutes = minutes;
        self
    }

    /// Set the depletion rate
    pub fn with_depletion_rate(mut self, per_minute: f64) -> Self {
        self.depletion_rate_per_minute = per_minute;
        self
    }

    /// Convert sleep minutes into energy percentage points
    pub fn sleep_to_pct(&self, minutes: f64) -> f64 {
        if self.full_sleep_minutes <= 0.0 {
            return 0.0;
        }
        minutes * 100.0 / self.full_sleep_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnergyConfig::default();
        assert_eq!(config.sleep_to_pct(480.0), 100.0);
        assert_eq!(config.sleep_to_pct(240.0), 50.0);
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_full_sleep_is_safe() {
        let config = EnergyConfig::default().with_full_sleep_minutes(0.0);
        assert_eq!(config.sleep_to_pct(300.0), 0.0);
    }

    #[test]
    fn test_parse_partial() {
        let config: EnergyConfig = toml::from_str("depletion_rate_per_minute = 0.1").unwrap();
        assert_eq!(config.depletion_rate_per_minute, 0.1);
        assert_eq!(config.full_sleep_minutes, 480.0);
    }
}
