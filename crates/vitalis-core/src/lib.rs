//! # Vitalis Core
//!
//! Core types, calendar, and provider abstraction for the Vitalis
//! on-device wellness engine.
//!
//! Nothing in this crate touches disk or the network; the storage,
//! sync, and energy crates build on these types.
//!
//! ## Key Types
//!
//! - [`DayKey`]: Local calendar day, the natural key of daily rows
//! - [`LocalCalendar`]: Instant to day mapping in the device timezone
//! - [`HealthSnapshot`]: One day of health metrics
//! - [`Streak`], [`CompletedLog`], [`Badge`]: Quest ledger records
//!
//! ## Key Traits
//!
//! - [`HealthProvider`]: Capability interface over a platform health store
//! - [`Clock`]: Time abstraction for testability

pub mod calendar;
pub mod error;
pub mod mock_provider;
pub mod provider;
pub mod quest;
pub mod snapshot;

pub use calendar::*;
pub use error::*;
pub use mock_provider::*;
pub use provider::*;
pub use quest::*;
pub use snapshot::*;
