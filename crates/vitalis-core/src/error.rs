//! Error types for vitalis-core

use thiserror::Error;

/// Errors raised by core domain types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A date key that is not `YYYY-MM-DD`
    #[error("Invalid day key: {0}")]
    InvalidDayKey(String),

    /// UTC offset outside of +/- 24h
    #[error("Invalid UTC offset: {0} minutes")]
    InvalidOffset(i32),

    /// Not an IANA timezone name
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    /// Day window longer than the calendar allows
    #[error("Day window of {requested} days exceeds the maximum of {max}")]
    WindowTooLarge { requested: u32, max: u32 },

    /// Quest completion request that cannot be applied
    #[error("Invalid quest completion: {0}")]
    InvalidQuest(String),
}

/// Errors raised by a health provider accessor
///
/// Accessors are expected to fail soft, so callers treat any of these
/// as "metric unknown" rather than a fatal condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The host platform has no health store
    #[error("Health provider unavailable")]
    Unavailable,

    /// The user denied read access
    #[error("Health permission denied")]
    PermissionDenied,

    /// The query did not complete in time
    #[error("Health query timed out after {0} ms")]
    Timeout(u64),

    /// The native query failed
    #[error("Health query failed: {0}")]
    Query(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for provider accessors
pub type ProviderResult<T> = Result<T, ProviderError>;
