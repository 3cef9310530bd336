//! Error types for the synchronization protocols

use thiserror::Error;

use crate::NodeId;

/// Errors produced by the synchronization core.
///
/// Variants fall into three groups: recoverable caller errors that are
/// rejected before any register write is issued (`SchedulingRejected`,
/// `Range`, `OutOfRange`, `AccumulationTooShort`, `UnknownAntenna`),
/// fatal per-node failures where side effects may already be applied
/// (`CommitNotAccepted`, `HeldInReset`, `MissedWindow`, `CommitNotFired`,
/// `Arming`, `Channel`), and controller state errors (`Connectivity`,
/// `NoEpoch`, `DegenerateAgreement`).
#[derive(Error, Debug)]
pub enum LockstepError {
    // Startup / connectivity
    #[error("node {node} is unreachable: {reason}")]
    Connectivity { node: NodeId, reason: String },

    // Scheduling (rejected before any write is issued)
    #[error("cannot schedule in the past: requested counter {requested}, earliest permitted {earliest}")]
    SchedulingRejected { requested: u64, earliest: u64 },

    // Coefficient encoding
    #[error("{field}: requested {requested:e} has no nonzero encoding (smallest step is {step:e})")]
    Range {
        field: &'static str,
        requested: f64,
        step: f64,
    },

    #[error("{field}: requested {requested:e} exceeds the representable range of +/-{limit:e}")]
    OutOfRange {
        field: &'static str,
        requested: f64,
        limit: f64,
    },

    #[error("accumulation of {requested} spectra is shorter than one hardware batch of {batch}")]
    AccumulationTooShort { requested: u32, batch: u32 },

    // Layout
    #[error("no antenna {antenna} in this array (total {total} antennas)")]
    UnknownAntenna { antenna: u32, total: u32 },

    // Scheduled commits (side effects already applied on some nodes)
    #[error("node {node} rejected the scheduled commit (arm counter did not advance)")]
    CommitNotAccepted { node: NodeId },

    #[error("node {node} appears to be held in reset")]
    HeldInReset { node: NodeId },

    #[error("missed the load window on {node} by about {late_ms:.1} ms")]
    MissedWindow { node: NodeId, late_ms: f64 },

    #[error("node {node} accepted the scheduled commit but never fired it")]
    CommitNotFired { node: NodeId },

    // Arming
    #[error("producer {node} did not trigger on the expected pulse edge")]
    Arming { node: NodeId },

    #[error("no epoch is established; run the arming protocol first")]
    NoEpoch,

    #[error("the registry has no producer nodes")]
    NoProducers,

    // Verification
    #[error("cross-node agreement is degenerate: {0}")]
    DegenerateAgreement(String),

    // Control channel
    #[error("control channel failure on {node}: {reason}")]
    Channel { node: NodeId, reason: String },
}

impl LockstepError {
    /// True when the error was raised before any register write was issued,
    /// so the caller may safely adjust the request and retry.
    pub fn rejected_before_side_effects(&self) -> bool {
        matches!(
            self,
            LockstepError::SchedulingRejected { .. }
                | LockstepError::Range { .. }
                | LockstepError::OutOfRange { .. }
                | LockstepError::AccumulationTooShort { .. }
                | LockstepError::UnknownAntenna { .. }
        )
    }
}

/// Result type for lockstep operations.
pub type LockstepResult<T> = Result<T, LockstepError>;
