//! Configuration types for the logging system

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level (can be overridden by RUST_LOG)
    pub default_level: String,

    /// Console output configuration
    pub console: ConsoleConfig,

    /// File output configuration
    pub file: Option<FileConfig>,

    /// JSONL output configuration
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// Verbose, human-readable console output
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// JSONL files only, rotated daily
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig {
                enabled: false,
                pretty: false,
                ansi: false,
            },
            file: Some(FileConfig {
                directory: log_dir,
                ..FileConfig::default()
            }),
            jsonl: JsonlConfig::default(),
        }
    }

    /// Warnings and errors only
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: false,
            },
            ..Default::default()
        }
    }
}

/// Console output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Enable console output
    pub enabled: bool,
    /// Use pretty (human-readable) format instead of JSONL
    pub pretty: bool,
    /// Include ANSI colors
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false, // JSONL by default
            ansi: false,
        }
    }
}

/// File output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Directory for log files
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    /// Rotation strategy
    pub rotation: RotationStrategy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "vitalis".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// Rotate daily
    #[default]
    Daily,
    /// Rotate hourly
    Hourly,
    /// Never rotate (single file)
    Never,
}

/// JSONL formatting configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Flatten event fields to root level
    pub flatten_events: bool,
    /// Include span list in events
    pub include_spans: bool,
    /// Include file/line information
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: false,
        }
    }
}
