//! # Vitalis Energy
//!
//! A continuously evolving energy percentage derived from sleep.
//!
//! - [`EnergySimulator`]: baseline, depletion, rollover, nap top-ups, crossing prediction
//! - [`EnergyState`]: the observable state, shared through a watch channel
//! - [`EnergyTasks`]: the periodic loops, torn down on shutdown or drop
//!
//! `energy_pct` is `None` exactly when today's sleep baseline is unknown.

pub mod config;
pub mod error;
pub mod simulator;
pub mod state;
pub mod tasks;

pub use config::EnergyConfig;
pub use error::{EnergyError, EnergyResult};
pub use simulator::EnergySimulator;
pub use state::{Baseline, EnergyState, clamp_pct};
pub use tasks::EnergyTasks;
