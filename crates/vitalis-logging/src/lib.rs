//! Structured logging for the Vitalis engine
//!
//! Console output is JSONL by default or human-readable for development;
//! an optional JSONL file sink rotates through tracing-appender. `RUST_LOG`
//! overrides the configured level.
//!
//! # Quick Start
//!
//! ```ignore
//! use vitalis_logging::{LogConfig, VitalisSubscriberBuilder};
//!
//! // JSONL to console
//! let _guard = VitalisSubscriberBuilder::new().init();
//!
//! // Pretty output while developing
//! let _guard = VitalisSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Errors from subscriber setup
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log output: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global subscriber is already set: {0}")]
    AlreadyInitialized(String),
}

pub type LoggingResult<T> = Result<T, LoggingError>;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Builder for configuring and initializing the Vitalis logging subscriber
pub struct VitalisSubscriberBuilder {
    config: LogConfig,
}

impl Default for VitalisSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VitalisSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    ///
    /// Default: JSONL output to console
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level))
    }

    fn jsonl_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_writer(writer)
            .with_filter(self.env_filter())
            .boxed()
    }

    /// Build the layers without installing them
    ///
    /// The returned guard, if any, flushes the file sink when dropped.
    pub fn build_layers(&self) -> LoggingResult<(Vec<BoxedLayer>, Option<WorkerGuard>)> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            if self.config.console.pretty {
                layers.push(
                    fmt::layer()
                        .with_ansi(self.config.console.ansi)
                        .with_target(true)
                        .with_filter(self.env_filter())
                        .boxed(),
                );
            } else {
                layers.push(self.jsonl_layer(std::io::stdout));
            }
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(self.jsonl_layer(writer));
        }

        Ok((layers, guard))
    }

    /// Install the subscriber globally
    ///
    /// Keep the returned guard alive for as long as file output is wanted.
    pub fn try_init(self) -> LoggingResult<Option<WorkerGuard>> {
        let (layers, guard) = self.build_layers()?;
        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Like [`try_init`](Self::try_init), reporting failure on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }
}

/// Create the file sink; `Never` truncates a single file, the others append
fn file_writer(file_config: &FileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&file_config.directory)?;
    Ok(match file_config.rotation {
        RotationStrategy::Never => {
            let path = file_config
                .directory
                .join(format!("{}.log", file_config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &file_config.directory,
            &file_config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &file_config.directory,
            &file_config.prefix,
        )),
    })
}

/// Pretty console logging at debug level
pub fn init_development() -> Option<WorkerGuard> {
    VitalisSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Quiet logging for tests; safe to call more than once
pub fn init_testing() {
    let _ = VitalisSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
