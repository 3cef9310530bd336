//! Scheduled commits
//!
//! The generic pattern: snapshot each target's accept/fire counters, write
//! a future-dated target with the pending-bit protocol, sleep past the
//! target, then classify each node's outcome from a second snapshot.
//! Specialized here for per-path delay/phase coefficient loads (tick
//! domain) and whole-array accumulator restarts (packet domain).

use std::time::Duration;

use lockstep_core::{
    signal_path, CoefficientAnnouncement, LockstepError, LockstepResult, NodeId, Polarization,
};
use lockstep_registry::registers::{accumulator, TARGET_PENDING};
use lockstep_registry::ScheduleSnapshot;
use lockstep_time::{CounterDomain, Epoch};

use crate::Controller;

/// Signed fine-delay fraction width.
const FINE_DELAY_BITS: u32 = 16;
/// Coarse delay width in whole ticks.
const COARSE_DELAY_BITS: u32 = 16;
/// Signed rate fraction width.
const RATE_BITS: u32 = 16;
/// Phase offset width, in 1/2^16 of a cycle.
const PHASE_BITS: u32 = 16;
/// Rates are right-shifted this much more for extra precision.
const SCHEDULE_RATE_SHIFT: u32 = 23;

/// When a scheduled commit should take effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetTime {
    /// As soon as the safety margin allows.
    Asap,
    /// At a wall-clock instant, seconds since the Unix epoch.
    At(f64),
}

/// A delay/phase coefficient load for one signal path.
#[derive(Clone, Copy, Debug)]
pub struct CoefficientRequest {
    pub antenna: u32,
    pub polarization: Polarization,
    /// Delay in seconds.
    pub delay: f64,
    /// Delay rate in seconds per second.
    pub delay_rate: f64,
    /// Phase offset in degrees.
    pub phase_offset: f64,
    /// Phase rate in Hz.
    pub phase_rate: f64,
    pub load_at: TargetTime,
}

impl CoefficientRequest {
    pub fn new(antenna: u32, polarization: Polarization) -> Self {
        CoefficientRequest {
            antenna,
            polarization,
            delay: 0.0,
            delay_rate: 0.0,
            phase_offset: 0.0,
            phase_rate: 0.0,
            load_at: TargetTime::Asap,
        }
    }
}

/// What the hardware will actually apply, after quantization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppliedCoefficients {
    pub delay: f64,
    pub delay_rate: f64,
    pub phase_offset: f64,
    pub phase_rate: f64,
    /// Tick counter at which the load fires.
    pub target: u64,
}

/// Quantized register codes for one coefficient load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CoefficientCodes {
    pub coarse: i32,
    pub fine: i16,
    pub fine_rate: i16,
    pub phase: i16,
    pub phase_rate: i16,
}

impl CoefficientCodes {
    /// The values these codes decode back to.
    pub fn achieved(&self, tick_rate: f64, target: u64) -> AppliedCoefficients {
        let fine_scale = f64::from(1u32 << (FINE_DELAY_BITS - 1));
        let rate_scale = (1u64 << (SCHEDULE_RATE_SHIFT + RATE_BITS - 1)) as f64;
        AppliedCoefficients {
            delay: (f64::from(self.coarse) + f64::from(self.fine) / fine_scale) / tick_rate,
            delay_rate: f64::from(self.fine_rate) / rate_scale,
            phase_offset: f64::from(self.phase) / f64::from(1u32 << PHASE_BITS) * 360.0,
            phase_rate: f64::from(self.phase_rate) / rate_scale * tick_rate,
            target,
        }
    }
}

/// Quantize a coefficient request. Rejects, before anything is written,
/// any nonzero value that would encode to zero (`Range`) or overflow its
/// field (`OutOfRange`).
pub(crate) fn encode_coefficients(
    tick_rate: f64,
    req: &CoefficientRequest,
) -> LockstepResult<CoefficientCodes> {
    let fine_scale = f64::from(1u32 << (FINE_DELAY_BITS - 1));
    let rate_scale = (1u64 << (SCHEDULE_RATE_SHIFT + RATE_BITS - 1)) as f64;

    // Delay splits into whole ticks plus a signed fraction of one tick.
    let delay_ticks = req.delay * tick_rate;
    let coarse_limit = 1i64 << COARSE_DELAY_BITS;
    if (delay_ticks as i64).abs() > coarse_limit {
        return Err(LockstepError::OutOfRange {
            field: "delay",
            requested: req.delay,
            limit: coarse_limit as f64 / tick_rate,
        });
    }
    let coarse = delay_ticks as i32;
    let fine = ((delay_ticks - f64::from(coarse)) * fine_scale) as i16;
    if req.delay != 0.0 && coarse == 0 && fine == 0 {
        return Err(LockstepError::Range {
            field: "fine delay",
            requested: req.delay,
            step: 1.0 / (tick_rate * fine_scale),
        });
    }

    let fine_rate_raw = req.delay_rate * rate_scale;
    let rate_limit = 1i64 << (RATE_BITS - 1);
    if (fine_rate_raw as i64).abs() > rate_limit {
        return Err(LockstepError::OutOfRange {
            field: "delay rate",
            requested: req.delay_rate,
            limit: rate_limit as f64 / rate_scale,
        });
    }
    let fine_rate = fine_rate_raw as i16;
    if req.delay_rate != 0.0 && fine_rate == 0 {
        return Err(LockstepError::Range {
            field: "delay rate",
            requested: req.delay_rate,
            step: 1.0 / rate_scale,
        });
    }

    // Phase offsets wrap to half a cycle either side of zero.
    let turns = req.phase_offset / 360.0;
    let wrapped = turns - turns.round();
    let phase = (wrapped * f64::from(1u32 << PHASE_BITS)).round() as i64;
    let phase = phase.clamp(-(1 << (PHASE_BITS - 1)), (1 << (PHASE_BITS - 1)) - 1) as i16;
    if phase == 0 && wrapped != 0.0 {
        return Err(LockstepError::Range {
            field: "phase offset",
            requested: req.phase_offset,
            step: 360.0 / f64::from(1u32 << PHASE_BITS),
        });
    }

    let phase_rate_raw = req.phase_rate / tick_rate * rate_scale;
    if (phase_rate_raw as i64).abs() > rate_limit {
        return Err(LockstepError::OutOfRange {
            field: "phase rate",
            requested: req.phase_rate,
            limit: rate_limit as f64 / rate_scale * tick_rate,
        });
    }
    let phase_rate = phase_rate_raw as i16;
    if req.phase_rate != 0.0 && phase_rate == 0 {
        return Err(LockstepError::Range {
            field: "phase rate",
            requested: req.phase_rate,
            step: tick_rate / rate_scale,
        });
    }

    Ok(CoefficientCodes {
        coarse,
        fine,
        fine_rate,
        phase,
        phase_rate,
    })
}

/// Resolve a requested target into a counter value satisfying the safety
/// margin, rounded up to the next `granularity` boundary.
///
/// An explicit time closer than `current + margin` is rejected before any
/// write is issued; scheduling in the past is never attempted.
pub(crate) fn resolve_target(
    epoch: &Epoch,
    domain: CounterDomain,
    current: u64,
    target: TargetTime,
    margin: Duration,
    granularity: u64,
) -> LockstepResult<u64> {
    let margin_counts = (margin.as_secs_f64() * epoch.rate(domain)).round() as u64;
    let earliest = current + margin_counts;

    let round_up = |count: u64| {
        if granularity > 1 {
            count.div_ceil(granularity) * granularity
        } else {
            count
        }
    };

    match target {
        TargetTime::Asap => Ok(round_up(earliest)),
        TargetTime::At(t) => {
            let requested = epoch.counter_from_time(domain, t);
            if requested < earliest {
                return Err(LockstepError::SchedulingRejected {
                    requested,
                    earliest,
                });
            }
            Ok(round_up(requested))
        }
    }
}

/// Classify one target's outcome from its before/after snapshots and the
/// live counter at verification time.
pub(crate) fn classify_outcome(
    node: &NodeId,
    before: ScheduleSnapshot,
    after: ScheduleSnapshot,
    counter_now: u64,
    target: u64,
    rate: f64,
) -> LockstepResult<()> {
    if !after.accepted_since(before) {
        if after.arm_count == 0 {
            return Err(LockstepError::HeldInReset { node: node.clone() });
        }
        return Err(LockstepError::CommitNotAccepted { node: node.clone() });
    }
    if !after.fired_since(before) {
        if counter_now > target {
            let late_ms = (counter_now - target) as f64 / rate * 1e3;
            return Err(LockstepError::MissedWindow {
                node: node.clone(),
                late_ms,
            });
        }
        return Err(LockstepError::CommitNotFired { node: node.clone() });
    }
    Ok(())
}

/// Load delay/phase coefficients into one producer input, verified against
/// its schedule counters.
pub(crate) async fn load_coefficients(
    ctrl: &Controller,
    req: CoefficientRequest,
) -> LockstepResult<AppliedCoefficients> {
    let epoch = ctrl.epoch()?;
    let config = ctrl.config();
    let tick_rate = config.timing.tick_rate;

    let path = signal_path(config, req.antenna, req.polarization)?;
    let codes = encode_coefficients(tick_rate, &req)?;

    let board = path.producer_board as usize;
    let input = path.input;

    let (before, current) = ctrl
        .registry()
        .with_producer(board, move |n| {
            Ok((n.schedule_snapshot(input)?, n.tick_counter()?))
        })
        .await?;

    let target = resolve_target(
        &epoch,
        CounterDomain::Ticks,
        current,
        req.load_at,
        config.timing.coefficient_margin,
        1,
    )?;

    let applied = codes.achieved(tick_rate, target);
    if req.delay != 0.0 {
        tracing::warn!(
            antenna = req.antenna,
            requested = req.delay,
            achieved = applied.delay,
            "delay quantized"
        );
    }
    if req.phase_offset != 0.0 {
        tracing::warn!(
            antenna = req.antenna,
            requested = req.phase_offset,
            achieved = applied.phase_offset,
            "phase offset quantized"
        );
    }

    tracing::info!(
        antenna = req.antenna,
        pol = %req.polarization.as_char(),
        board,
        input,
        target,
        "scheduling coefficient load"
    );
    ctrl.registry()
        .with_producer(board, move |n| {
            n.set_coarse_delay(input, codes.coarse)?;
            n.write_fine_delay(input, codes.fine_rate, codes.fine)?;
            n.write_phase(input, codes.phase_rate, codes.phase)?;
            n.commit_load_target(input, target)
        })
        .await?;

    let deadline = epoch.time_from_ticks(target) + config.timing.latency_allowance.as_secs_f64();
    ctrl.clock().sleep_until_unix(deadline).await;

    let (after, counter_now) = ctrl
        .registry()
        .with_producer(board, move |n| {
            Ok((n.schedule_snapshot(input)?, n.tick_counter()?))
        })
        .await?;
    let node = ctrl.registry().producers()[board].id().clone();
    classify_outcome(&node, before, after, counter_now, target, tick_rate)?;

    ctrl.announcer().coefficients(&CoefficientAnnouncement {
        antenna: req.antenna,
        polarization: req.polarization,
        delay: applied.delay,
        delay_rate: applied.delay_rate,
        phase_offset: applied.phase_offset,
        phase_rate: applied.phase_rate,
    });
    Ok(applied)
}

/// Restart every accumulation engine on one shared packet boundary.
///
/// The target is rounded to the channel-count boundary the hardware
/// actually latches on, so every engine restarts on the same global
/// period. Returns the committed packet counter.
pub(crate) async fn restart_accumulators(
    ctrl: &Controller,
    at: TargetTime,
) -> LockstepResult<u64> {
    let epoch = ctrl.epoch()?;
    let config = ctrl.config();
    let engines = config.engines_per_accumulator;

    let before = ctrl
        .registry()
        .map_accumulators(move |n| {
            (0..engines)
                .map(|e| n.restart_snapshot(e))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .into_result()?;

    let current = ctrl.current_packets().await?;
    let target = resolve_target(
        &epoch,
        CounterDomain::Packets,
        current,
        at,
        config.timing.restart_margin,
        config.restart_boundary_packets(),
    )?;
    tracing::info!(target, current, "scheduling accumulator restart");

    // The halves are committed register-by-register across the whole
    // array, so no node can latch while a peer still holds a torn target.
    let msw = (target >> 32) as u32 & !TARGET_PENDING;
    let lsw = target as u32;
    ctrl.registry()
        .write_accumulators(accumulator::RESTART_TARGET_LSW, lsw)
        .await
        .into_result()?;
    ctrl.registry()
        .write_accumulators(accumulator::RESTART_TARGET_MSW, msw | TARGET_PENDING)
        .await
        .into_result()?;
    ctrl.registry()
        .write_accumulators(accumulator::RESTART_TARGET_MSW, msw)
        .await
        .into_result()?;

    ctrl.clock()
        .sleep_until_unix(epoch.time_from_packets(target))
        .await;
    let counter_now = ctrl.current_packets().await?;
    ctrl.clock().sleep(config.timing.latency_allowance).await;

    let after = ctrl
        .registry()
        .map_accumulators(move |n| {
            (0..engines)
                .map(|e| n.restart_snapshot(e))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .into_result()?;

    let mut first_failure = None;
    for ((node, before_engines), (_, after_engines)) in before.iter().zip(&after) {
        for (engine, (b, a)) in before_engines.iter().zip(after_engines).enumerate() {
            if let Err(err) = classify_outcome(
                node,
                *b,
                *a,
                counter_now,
                target,
                epoch.packet_rate(),
            ) {
                tracing::error!(%node, engine, "accumulator restart failed: {err}");
                first_failure.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_failure {
        return Err(err);
    }

    Ok(target)
}
