//! The arming protocol
//!
//! Establishes a new epoch: every producer is told to re-zero its counters
//! on its next external pulse edge, at a trigger time chosen so that all of
//! them see the same edge. Phases run `Idle -> PhaseWait -> Triggered ->
//! Settling -> Verified | Failed`.

use std::fmt;

use lockstep_core::{LockstepError, LockstepResult};
use lockstep_registry::SyncControl;
use lockstep_time::Epoch;

use crate::Controller;

/// Sub-second boundary the protocol aligns to before triggering, so it
/// never races a trigger pulse already propagating through the pipeline.
const PHASE_ALIGN_SECS: f64 = 0.5;

/// Phases of one arming run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmingPhase {
    Idle,
    PhaseWait,
    Triggered,
    Settling,
    Verified,
    Failed,
}

impl fmt::Display for ArmingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArmingPhase::Idle => "idle",
            ArmingPhase::PhaseWait => "phase-wait",
            ArmingPhase::Triggered => "triggered",
            ArmingPhase::Settling => "settling",
            ArmingPhase::Verified => "verified",
            ArmingPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub(crate) async fn run(ctrl: &Controller) -> LockstepResult<f64> {
    let clock = ctrl.clock();
    let timing = &ctrl.config().timing;

    tracing::debug!(phase = %ArmingPhase::PhaseWait, "waiting for the phase boundary");
    let now = clock.now_unix();
    let boundary = (now / PHASE_ALIGN_SECS).ceil() * PHASE_ALIGN_SECS;
    clock.sleep_until_unix(boundary).await;

    // At least one full second out: a pulse edge already in flight must be
    // able to clear the pipeline before the trigger takes effect.
    let trigger_time = (clock.now_unix() + 1.0).ceil();
    tracing::info!(phase = %ArmingPhase::Triggered, trigger_time, "broadcasting trigger arm");

    // Deassert first: a node whose arm bit is already set would otherwise
    // never see the rising edge and stay disabled.
    ctrl.pulse_producer_control(|on| SyncControl {
        trigger_arm: on,
        ..Default::default()
    })
    .await?;

    // Only now that the trigger is on its way to every node does the epoch
    // move; consumers must never observe a sync time the hardware has not
    // been told about.
    ctrl.replace_epoch(Epoch::new(
        trigger_time,
        timing.tick_rate,
        timing.packet_rate,
    ));

    tracing::debug!(phase = %ArmingPhase::Settling, settle = ?timing.arm_settle, "settling");
    clock.sleep(timing.arm_settle).await;

    let statuses = ctrl
        .registry()
        .map_producers(|n| n.pulse_status())
        .await
        .into_result()?;
    let stuck: Vec<_> = statuses
        .iter()
        .filter(|(_, status)| status.armed)
        .collect();
    if let Some((node, _)) = stuck.first() {
        for (node, _) in &stuck {
            tracing::error!(phase = %ArmingPhase::Failed, %node, "producer did not trigger");
        }
        return Err(LockstepError::Arming { node: node.clone() });
    }

    tracing::info!(phase = %ArmingPhase::Verified, sync_time = trigger_time, "array armed");
    ctrl.announce_timing()?;
    Ok(trigger_time)
}
