//! Array configuration
//!
//! The configuration is injected as an already-validated, immutable value;
//! loading and validating it from disk is an outer layer's concern.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static description of the processing array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayConfig {
    /// Dual-polarization antennas feeding the array.
    pub n_antennas: u32,
    /// Polarizations per antenna.
    pub n_polarizations: u32,
    /// Spectral channels across the whole array.
    pub n_channels: u32,
    /// Total accumulation engines across all accumulator nodes.
    pub n_accum_engines: u32,
    /// Accumulation engines hosted per accumulator node.
    pub engines_per_accumulator: u32,
    /// Signal inputs per producer board (antennas x polarizations).
    pub inputs_per_producer: u32,
    /// Antennas carried per inter-node link.
    pub antennas_per_link: u32,
    /// Links per producer node.
    pub links_per_producer: u32,
    /// Links per accumulator node.
    pub links_per_accumulator: u32,
    pub timing: TimingConfig,
    pub accumulation: AccumulationConfig,
}

/// Clock rates and protocol timing margins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Hardware sampling ticks per second (the tick-counter rate).
    pub tick_rate: f64,
    /// Packet timestamps per second (the packet-counter rate).
    pub packet_rate: f64,
    /// Digitized analogue bandwidth in Hz.
    pub bandwidth: f64,
    /// Rate of the external timing pulse input, nominally 1 Hz.
    pub pulse_rate: f64,
    /// Post-trigger settle before verifying an arm; must exceed one pulse
    /// period.
    pub arm_settle: Duration,
    /// Minimum future margin for coefficient loads.
    pub coefficient_margin: Duration,
    /// Minimum future margin for accumulator restarts.
    pub restart_margin: Duration,
    /// Extra wait after a scheduled target before verification, covering
    /// network latency to the slowest node.
    pub latency_allowance: Duration,
    /// Wall-clock bound on one whole-array batch operation.
    pub batch_timeout: Duration,
    /// Settle after re-arming during resynchronization.
    pub resync_settle: Duration,
    /// Settle after clearing error counters during resynchronization.
    pub post_clear_settle: Duration,
}

/// Accumulator integration parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccumulationConfig {
    /// Spectra accumulated per hardware batch; the minimum integration
    /// step the accumulators support.
    pub batch_length: u32,
    /// Default spectra per integration when the caller does not specify.
    pub default_count: u32,
}

impl ArrayConfig {
    /// Spectral channels handled by one accumulation engine.
    pub fn channels_per_engine(&self) -> u32 {
        self.n_channels / self.n_accum_engines
    }

    /// Antennas digitized per producer board.
    pub fn antennas_per_producer(&self) -> u32 {
        self.inputs_per_producer / self.n_polarizations
    }

    /// Fresh spectra produced per second.
    pub fn spectrum_rate(&self) -> f64 {
        self.timing.bandwidth / f64::from(self.n_channels)
    }

    /// Integration time in seconds for a given accumulation count.
    pub fn integration_time(&self, n_spectra: u32) -> f64 {
        f64::from(n_spectra) / self.spectrum_rate()
    }

    /// Boundary, in packet counts, that accumulator restart targets are
    /// rounded to.
    ///
    /// The hardware latches restarts on whole channel-count boundaries
    /// only, which is coarser than the full processing period of
    /// `n_antennas * channels_per_engine * batch_length` ticks one might
    /// expect; scheduling against the coarser boundary keeps software and
    /// hardware agreed on where the restart lands.
    pub fn restart_boundary_packets(&self) -> u64 {
        u64::from(self.n_channels)
    }

    /// Expected ticks between consecutive timing pulses.
    pub fn ticks_per_pulse(&self) -> f64 {
        self.timing.tick_rate / self.timing.pulse_rate
    }
}

#[cfg(test)]
pub(crate) fn reference_config() -> ArrayConfig {
    ArrayConfig {
        n_antennas: 8,
        n_polarizations: 2,
        n_channels: 2048,
        n_accum_engines: 4,
        engines_per_accumulator: 2,
        inputs_per_producer: 8,
        antennas_per_link: 2,
        links_per_producer: 2,
        links_per_accumulator: 2,
        timing: TimingConfig {
            tick_rate: 800_000_000.0,
            packet_rate: 1_600_000.0,
            bandwidth: 400_000_000.0,
            pulse_rate: 1.0,
            arm_settle: Duration::from_millis(2100),
            coefficient_margin: Duration::from_millis(100),
            restart_margin: Duration::from_millis(500),
            latency_allowance: Duration::from_millis(200),
            batch_timeout: Duration::from_secs(10),
            resync_settle: Duration::from_secs(4),
            post_clear_settle: Duration::from_secs(2),
        },
        accumulation: AccumulationConfig {
            batch_length: 128,
            default_count: 1024,
        },
    }
}
