//! Lockstep Runtime - Driving the array as one logical pipeline
//!
//! The controller owns the node registry and the current epoch, and runs
//! the protocols that keep the array phase-aligned:
//! - arming: establish a new epoch by phase-aligned triggering
//! - scheduled commits: future-dated, verified register updates
//!   (delay/phase coefficient loads, accumulator restarts)
//! - resynchronization: verify-and-rearm under a retry budget

pub mod accumulation;
pub mod arming;
pub mod commit;
pub mod controller;
pub mod resync;

pub use arming::ArmingPhase;
pub use commit::{AppliedCoefficients, CoefficientRequest, TargetTime};
pub use controller::Controller;
pub use resync::{ResyncOutcome, RetryBudget};
