//! Configuration for the wellness engine

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vitalis_core::{BadgeCatalog, LocalCalendar, ProviderKind};
use vitalis_energy::EnergyConfig;
use vitalis_logging::LogConfig;
use vitalis_storage::StoreConfig;
use vitalis_sync::SyncConfig;

use crate::error::{EngineError, EngineResult};

/// Configuration for a [`WellnessEngine`](crate::WellnessEngine)
///
/// Every field has a default, so a partial TOML file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for the database and credentials
    pub data_dir: PathBuf,
    /// Store configuration; a relative `db_path` is taken relative to `data_dir`
    pub store: StoreConfig,
    /// Reconciler configuration
    pub sync: SyncConfig,
    /// Energy simulator configuration
    pub energy: EnergyConfig,
    /// Which health provider to use
    pub provider: ProviderKind,
    /// IANA timezone for the local calendar, e.g. `Europe/Berlin`
    pub timezone: Option<String>,
    /// Fixed calendar offset, used when no timezone is named
    pub utc_offset_minutes: Option<i32>,
    /// Badge rules checked on every quest completion
    pub badges: BadgeCatalog,
    /// Logging setup used by the CLI
    pub logging: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./vitalis-data"),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            energy: EnergyConfig::default(),
            provider: ProviderKind::default(),
            timezone: None,
            utc_offset_minutes: None,
            badges: BadgeCatalog::default(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Set the store configuration
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the reconciler configuration
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Set the energy configuration
    pub fn with_energy(mut self, energy: EnergyConfig) -> Self {
        self.energy = energy;
        self
    }

    /// Select the health provider
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Use an IANA timezone for the local calendar
    pub fn with_timezone(mut self, name: impl Into<String>) -> Self {
        self.timezone = Some(name.into());
        self
    }

    /// Pin the local calendar to an offset
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = Some(minutes);
        self
    }

    /// Replace the badge rules
    pub fn with_badges(mut self, badges: BadgeCatalog) -> Self {
        self.badges = badges;
        self
    }

    /// Store configuration with the database path resolved against `data_dir`
    pub fn resolved_store(&self) -> StoreConfig {
        let mut store = self.store.clone();
        if store.db_path.is_relative() {
            store.db_path = self.data_dir.join(&store.db_path);
        }
        store
    }

    /// Where the file credential store keeps the store key
    pub fn credentials_dir(&self) -> PathBuf {
        self.data_dir.join("credentials")
    }

    /// The local calendar this configuration describes
    ///
    /// A named timezone wins over a fixed offset; with neither, the device
    /// timezone is followed.
    pub fn calendar(&self) -> EngineResult<LocalCalendar> {
        if let Some(name) = &self.timezone {
            return Ok(LocalCalendar::named(name)?);
        }
        match self.utc_offset_minutes {
            Some(minutes) => Ok(LocalCalendar::with_offset_minutes(minutes)?),
            None => Ok(LocalCalendar::system()),
        }
    }
}
