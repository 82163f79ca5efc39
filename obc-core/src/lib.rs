// lib.rs
#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
pub mod macros;

pub mod beacon;
pub mod blackboard;
pub mod boot;
pub mod ccsds;
pub mod eps;
pub mod fdir;
pub mod health;
pub mod logging;
pub mod mode;
pub mod platform;
pub mod sched;
pub mod snapshot;
pub mod supervisor;
pub mod telecommand;
pub mod telemetry;
pub mod time;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use boot::{BootRecord, BootReport};
pub use eps::{BatteryState, EpsSensors, PowerBudget, Rail};
pub use fdir::{FaultType, RecoveryAction};
pub use health::HealthStatus;
pub use mode::{ModeState, Transition};
pub use platform::Platform;
pub use snapshot::SnapshotCell;
pub use types::*;
