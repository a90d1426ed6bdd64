//! Error types for vitalis-energy

use thiserror::Error;
use vitalis_core::ProviderError;
use vitalis_storage::StorageError;

#[derive(Debug, Error)]
pub enum EnergyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type EnergyResult<T> = Result<T, EnergyError>;
