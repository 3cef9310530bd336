//! Lockstep Core - Fundamental types for the array synchronization controller
//!
//! This crate defines the types shared by every other crate in the workspace:
//! - Node identity and roles (spectrum producers, accumulators)
//! - The error taxonomy for all synchronization protocols
//! - The validated, immutable array configuration
//! - Signal-path layout arithmetic (antenna/polarization to board/input)
//! - The metadata announcement contract

pub mod announce;
pub mod config;
pub mod error;
pub mod id;
pub mod layout;

pub use announce::*;
pub use config::*;
pub use error::*;
pub use id::*;
pub use layout::*;
