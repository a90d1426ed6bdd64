//! # Vitalis Sync
//!
//! Keeps one health snapshot per local day inside a rolling window.
//!
//! - [`HealthSyncReconciler`]: decides which days are missing or stale and backfills them
//! - [`SyncTask`]: optional periodic reconciliation in the background
//! - [`SyncConfig`]: window size, per-call timeout, and period

pub mod config;
pub mod error;
pub mod reconciler;
pub mod task;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use reconciler::{HealthSyncReconciler, SyncReport};
pub use task::SyncTask;
