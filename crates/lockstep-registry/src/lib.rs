//! Lockstep Registry - The set of controlled nodes
//!
//! Nodes come in two roles fixed for the process lifetime: spectrum
//! producers and accumulators. Each role exposes its own register surface;
//! the registry owns both sets and runs whole-array operations as
//! concurrent per-node calls with per-node outcomes.

pub mod batch;
pub mod node;
pub mod registers;
pub mod registry;
pub mod snapshot;

pub use batch::*;
pub use node::*;
pub use registry::*;
pub use snapshot::*;
