//! Error types for the wellness engine

use thiserror::Error;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] vitalis_storage::StorageError),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] vitalis_sync::SyncError),

    /// Energy simulator error
    #[error("Energy error: {0}")]
    Energy(#[from] vitalis_energy::EnergyError),

    /// Store key error
    #[error("Crypto error: {0}")]
    Crypto(#[from] vitalis_crypto::CryptoError),

    /// Invalid domain input
    #[error("Invalid input: {0}")]
    Core(#[from] vitalis_core::CoreError),

    /// Engine already started
    #[error("Engine already started")]
    AlreadyStarted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Task(e.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
