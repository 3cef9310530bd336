//! The array controller

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use lockstep_core::{
    Announce, ArrayConfig, GeometryAnnouncement, LockstepResult, StreamDescriptor,
    TimingAnnouncement,
};
use lockstep_health::HealthMonitor;
use lockstep_registry::{AccumControl, NodeRegistry, SyncControl};
use lockstep_time::{Clock, Epoch};

use crate::commit::{CoefficientRequest, TargetTime};
use crate::resync::{ResyncOutcome, RetryBudget};
use crate::{accumulation, arming, commit, resync, AppliedCoefficients};

/// Owns the registry, the current epoch, and the protocol entry points.
///
/// The epoch cell has a single writer (the arming protocol) and is replaced
/// atomically; every consumer works against the epoch captured when its
/// operation started. At most one arming or scheduled commit may be in
/// flight against a given node set at a time; overlapping them is a caller
/// error the protocols do not detect.
pub struct Controller {
    config: Arc<ArrayConfig>,
    registry: Arc<NodeRegistry>,
    clock: Arc<dyn Clock>,
    announcer: Arc<dyn Announce>,
    epoch: RwLock<Option<Epoch>>,
    accumulation_count: AtomicU32,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("producers", &self.registry.producers().len())
            .field("accumulators", &self.registry.accumulators().len())
            .field("accumulation_count", &self.accumulation_count)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a controller, validating reachability of every node. A node
    /// that stays unreachable after one retry aborts construction.
    pub async fn connect(
        config: Arc<ArrayConfig>,
        registry: Arc<NodeRegistry>,
        clock: Arc<dyn Clock>,
        announcer: Arc<dyn Announce>,
    ) -> LockstepResult<Self> {
        registry.ping_all().await?;
        tracing::info!(
            producers = registry.producers().len(),
            accumulators = registry.accumulators().len(),
            "all nodes reachable"
        );
        let default_count = config.accumulation.default_count;
        Ok(Controller {
            config,
            registry,
            clock,
            announcer,
            epoch: RwLock::new(None),
            accumulation_count: AtomicU32::new(default_count),
        })
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn announcer(&self) -> &Arc<dyn Announce> {
        &self.announcer
    }

    /// The current epoch, if one has been established.
    pub fn epoch(&self) -> LockstepResult<Epoch> {
        (*self.epoch.read()).ok_or(lockstep_core::LockstepError::NoEpoch)
    }

    pub(crate) fn replace_epoch(&self, epoch: Epoch) {
        *self.epoch.write() = Some(epoch);
    }

    /// Spectra per integration currently programmed.
    pub fn accumulation_count(&self) -> u32 {
        self.accumulation_count.load(Ordering::SeqCst)
    }

    pub(crate) fn store_accumulation_count(&self, count: u32) {
        self.accumulation_count.store(count, Ordering::SeqCst);
    }

    /// Tick counter of the reference producer.
    pub async fn current_ticks(&self) -> LockstepResult<u64> {
        self.registry.reference_producer()?;
        self.registry.with_producer(0, |n| n.tick_counter()).await
    }

    /// Packet counter derived from the reference producer's ticks.
    pub async fn current_packets(&self) -> LockstepResult<u64> {
        let epoch = self.epoch()?;
        Ok(epoch.packets_from_ticks(self.current_ticks().await?))
    }

    /// A verification engine over this controller's registry.
    pub fn health(&self) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&self.clock),
        )
    }

    /// Establish a new epoch by phase-aligned triggering of all producers.
    /// Returns the wall-clock sync time on success.
    pub async fn arm(&self) -> LockstepResult<f64> {
        arming::run(self).await
    }

    /// Schedule a delay/phase coefficient load for one signal path.
    pub async fn load_coefficients(
        &self,
        request: CoefficientRequest,
    ) -> LockstepResult<AppliedCoefficients> {
        commit::load_coefficients(self, request).await
    }

    /// Restart every accumulator on a shared packet boundary. Returns the
    /// committed packet counter.
    pub async fn restart_accumulators(&self, at: TargetTime) -> LockstepResult<u64> {
        commit::restart_accumulators(self, at).await
    }

    /// Program the accumulation length in spectra (`None` for the
    /// configured default), restarting the accumulators on a shared
    /// boundary. Returns the count actually applied.
    pub async fn set_accumulation_count(&self, n_spectra: Option<u32>) -> LockstepResult<u32> {
        accumulation::set_count(self, n_spectra).await
    }

    /// Program an approximate integration time in seconds; returns the
    /// achieved time.
    pub async fn set_integration_time(&self, seconds: f64) -> LockstepResult<f64> {
        accumulation::set_integration_time(self, seconds).await
    }

    /// Verify-and-rearm until the composite check passes or the budget is
    /// exhausted.
    pub async fn resynchronize(&self, budget: RetryBudget) -> LockstepResult<ResyncOutcome> {
        resync::run(self, budget).await
    }

    /// Pulse the error-counter clears on both roles.
    pub async fn clear_error_counters(&self) -> LockstepResult<()> {
        self.pulse_accumulator_control(|on| AccumControl {
            counter_reset: on,
            ..Default::default()
        })
        .await?;
        self.pulse_producer_control(|on| SyncControl {
            status_clear: on,
            ..Default::default()
        })
        .await
    }

    /// Pulse a hard reset of every accumulation engine.
    pub async fn reset_accumulators(&self) -> LockstepResult<()> {
        self.pulse_accumulator_control(|on| AccumControl {
            accum_reset: on,
            ..Default::default()
        })
        .await
    }

    /// Enable or disable the accumulators' output streams.
    pub async fn set_output_enabled(&self, enabled: bool) -> LockstepResult<()> {
        let ctrl = AccumControl {
            output_enable: enabled,
            ..Default::default()
        };
        self.registry
            .map_accumulators(move |n| n.write_control(ctrl))
            .await
            .into_result()?;
        Ok(())
    }

    /// Number every producer board and accumulation engine. Engines are
    /// indexed round-robin across nodes so adjacent channels land on
    /// different boards.
    pub async fn assign_board_indices(&self) -> LockstepResult<()> {
        for index in 0..self.registry.producers().len() {
            let board = index as u32;
            self.registry
                .with_producer(index, move |n| n.set_board_index(board))
                .await?;
        }

        let n_nodes = self.registry.accumulators().len() as u32;
        let engines = self.config.engines_per_accumulator;
        for position in 0..self.registry.accumulators().len() {
            let pos = position as u32;
            self.registry
                .with_accumulator(position, move |n| {
                    for engine in 0..engines {
                        n.set_engine_index(engine, engine * n_nodes + pos)?;
                    }
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }

    pub(crate) fn timing_announcement(&self) -> LockstepResult<TimingAnnouncement> {
        let epoch = self.epoch()?;
        let count = self.accumulation_count();
        Ok(TimingAnnouncement {
            sync_time: epoch.sync_time(),
            accumulation_count: count,
            integration_time: self.config.integration_time(count),
            packet_rate: self.config.timing.packet_rate,
        })
    }

    pub(crate) fn announce_timing(&self) -> LockstepResult<()> {
        let update = self.timing_announcement()?;
        self.announcer.timing(&update);
        Ok(())
    }

    /// Emit the static geometry announcement.
    pub fn announce_geometry(&self) {
        self.announcer.geometry(&GeometryAnnouncement {
            n_antennas: self.config.n_antennas,
            n_channels: self.config.n_channels,
            n_accum_engines: self.config.n_accum_engines,
            tick_rate: self.config.timing.tick_rate,
            bandwidth: self.config.timing.bandwidth,
            accumulation_batch: self.config.accumulation.batch_length,
        });
    }

    /// Emit the per-stream timestamp descriptors.
    pub fn announce_stream_descriptors(&self) {
        let streams: Vec<StreamDescriptor> = (0..self.config.n_accum_engines)
            .map(|engine| StreamDescriptor {
                engine,
                first_channel: engine,
                n_channels: self.config.channels_per_engine(),
                packet_rate: self.config.timing.packet_rate,
            })
            .collect();
        self.announcer.stream_descriptors(&streams);
    }

    /// Deassert, assert, deassert one producer control bit on every
    /// producer. The deassert always goes first so a bit left set by an
    /// earlier run cannot mask the rising edge.
    pub(crate) async fn pulse_producer_control(
        &self,
        make: fn(bool) -> SyncControl,
    ) -> LockstepResult<()> {
        for phase in [false, true, false] {
            let ctrl = make(phase);
            self.registry
                .map_producers(move |n| n.write_sync_control(ctrl))
                .await
                .into_result()?;
        }
        Ok(())
    }

    /// Deassert, assert, deassert one accumulator control bit on every
    /// accumulator.
    pub(crate) async fn pulse_accumulator_control(
        &self,
        make: fn(bool) -> AccumControl,
    ) -> LockstepResult<()> {
        for phase in [false, true, false] {
            let ctrl = make(phase);
            self.registry
                .map_accumulators(move |n| n.write_control(ctrl))
                .await
                .into_result()?;
        }
        Ok(())
    }
}
