//! Lockstep Health - Verifying that claimed synchronization still holds
//!
//! A battery of independent pass/fail checks over the node registry:
//! activity counters, error counters, reference-clock sanity, and
//! statistical cross-node agreement via the modal mean. The composite
//! check gates the resynchronization controller.

pub mod agreement;
pub mod checks;
pub mod report;

pub use agreement::*;
pub use checks::*;
pub use report::*;
