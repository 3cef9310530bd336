//! Metadata announcement contract
//!
//! Downstream consumers of the output streams need to be told whenever the
//! epoch, the integration parameters, or the per-path coefficients change.
//! The wire encoding is a collaborator's concern; this module only defines
//! the typed payloads and the emission points.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Polarization;

/// Epoch and integration timing, re-announced on every arming and on every
/// accumulation-length change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingAnnouncement {
    /// Wall-clock instant of the shared epoch, seconds since the Unix epoch.
    pub sync_time: f64,
    /// Spectra accumulated per integration.
    pub accumulation_count: u32,
    /// Approximate integration time in seconds.
    pub integration_time: f64,
    /// Divide an output timestamp by this to get seconds since `sync_time`.
    pub packet_rate: f64,
}

/// Static array geometry, announced on demand for late-joining consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryAnnouncement {
    pub n_antennas: u32,
    pub n_channels: u32,
    pub n_accum_engines: u32,
    pub tick_rate: f64,
    pub bandwidth: f64,
    /// Spectra per hardware accumulation batch.
    pub accumulation_batch: u32,
}

/// Applied delay/phase settings for one signal path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoefficientAnnouncement {
    pub antenna: u32,
    pub polarization: Polarization,
    /// Achieved delay in seconds.
    pub delay: f64,
    /// Achieved delay rate in seconds per second.
    pub delay_rate: f64,
    /// Achieved phase offset in degrees.
    pub phase_offset: f64,
    /// Achieved phase rate in Hz.
    pub phase_rate: f64,
}

/// Timestamp semantics of one output stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Accumulation engine emitting this stream.
    pub engine: u32,
    /// First channel carried by the stream; engines take channels
    /// round-robin.
    pub first_channel: u32,
    /// Channels per integration in this stream.
    pub n_channels: u32,
    /// Stream timestamps count packets since `sync_time` at `packet_rate`.
    pub packet_rate: f64,
}

/// Sink for metadata announcements.
///
/// Implementations encode and transmit these however their consumers need;
/// the core only guarantees *when* each is emitted.
pub trait Announce: Send + Sync {
    fn timing(&self, update: &TimingAnnouncement);
    fn geometry(&self, update: &GeometryAnnouncement);
    fn coefficients(&self, update: &CoefficientAnnouncement);
    fn stream_descriptors(&self, streams: &[StreamDescriptor]);
}

/// Discards every announcement.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAnnouncer;

impl Announce for NullAnnouncer {
    fn timing(&self, _: &TimingAnnouncement) {}
    fn geometry(&self, _: &GeometryAnnouncement) {}
    fn coefficients(&self, _: &CoefficientAnnouncement) {}
    fn stream_descriptors(&self, _: &[StreamDescriptor]) {}
}

/// One recorded announcement, kept in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum Announcement {
    Timing(TimingAnnouncement),
    Geometry(GeometryAnnouncement),
    Coefficients(CoefficientAnnouncement),
    StreamDescriptors(Vec<StreamDescriptor>),
}

/// Records announcements for inspection; used by tests.
#[derive(Debug, Default)]
pub struct RecordingAnnouncer {
    log: Mutex<Vec<Announcement>>,
}

impl RecordingAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Announcement> {
        self.log.lock().clone()
    }

    pub fn timing_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|a| matches!(a, Announcement::Timing(_)))
            .count()
    }
}

impl Announce for RecordingAnnouncer {
    fn timing(&self, update: &TimingAnnouncement) {
        self.log.lock().push(Announcement::Timing(update.clone()));
    }

    fn geometry(&self, update: &GeometryAnnouncement) {
        self.log.lock().push(Announcement::Geometry(update.clone()));
    }

    fn coefficients(&self, update: &CoefficientAnnouncement) {
        self.log
            .lock()
            .push(Announcement::Coefficients(update.clone()));
    }

    fn stream_descriptors(&self, streams: &[StreamDescriptor]) {
        self.log
            .lock()
            .push(Announcement::StreamDescriptors(streams.to_vec()));
    }
}
