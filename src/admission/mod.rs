//! Admission control: decides per request whether it may reach the router.
//!
//! Each client key gets a [`WindowCounter`] tracking admissions in the
//! current and previous fixed windows. The [`AdmissionGate`] combines them
//! into a weighted sliding-window estimate. Idle keys are reclaimed by a background sweep.

mod counter;
mod gate;
mod key;
mod strategy;
mod sweeper;

pub use counter::{CounterFault, WindowAlgorithm, WindowCounter, WindowGeometry};
pub use gate::{AdmissionGate, GateSettings};
pub use key::{ClientKey, KeyExtractor, UNKNOWN_CLIENT};
pub use strategy::AdmissionStrategy;
pub use sweeper::spawn_sweeper;
