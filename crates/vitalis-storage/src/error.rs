//! Error types for vitalis-storage
//!
//! This module defines the error types used throughout the storage crate.

use thiserror::Error;

use vitalis_core::CoreError;
use vitalis_crypto::CryptoError;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested item was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// A row could not be sealed or opened
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The store was written with a different key
    #[error("Store key does not match the database")]
    KeyMismatch,

    /// A request was rejected before touching the store
    #[error("Invalid request: {0}")]
    Invalid(#[from] CoreError),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StorageError::not_found("2024-01-01");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.to_string().contains("2024-01-01"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_crypto_error_conversion() {
        let err: StorageError = CryptoError::DecryptionFailed("tag".into()).into();
        assert!(matches!(err, StorageError::Crypto(_)));
    }

    #[test]
    fn test_invalid_request_conversion() {
        let err: StorageError = CoreError::InvalidQuest("empty".into()).into();
        assert!(err.to_string().contains("empty"));
    }
}
