//! Epoch and counter conversions

use serde::{Deserialize, Serialize};

/// Which hardware counter a scheduled operation is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterDomain {
    /// Raw sampling-clock ticks.
    Ticks,
    /// Packet-granularity timestamps.
    Packets,
}

impl CounterDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterDomain::Ticks => "ticks",
            CounterDomain::Packets => "packets",
        }
    }
}

/// The shared time origin of the array.
///
/// Established by a successful arming run and replaced atomically; all
/// counter conversions are relative to the current epoch only. Counters are
/// 64-bit and never wrap within one epoch: at the reference 800 MHz tick
/// rate a `u64` tick counter lasts roughly 730 years.
///
/// Times are f64 seconds since the Unix epoch, so conversion precision is
/// bounded by f64 resolution at the epoch's magnitude (well under a
/// microsecond for present-day epochs).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    sync_time: f64,
    tick_rate: f64,
    packet_rate: f64,
}

impl Epoch {
    pub fn new(sync_time: f64, tick_rate: f64, packet_rate: f64) -> Self {
        Epoch {
            sync_time,
            tick_rate,
            packet_rate,
        }
    }

    /// Wall-clock instant the counters were zeroed at.
    #[inline]
    pub fn sync_time(&self) -> f64 {
        self.sync_time
    }

    /// Sampling ticks per second.
    #[inline]
    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    /// Packet timestamps per second.
    #[inline]
    pub fn packet_rate(&self) -> f64 {
        self.packet_rate
    }

    /// Unix time at which the tick counter reads `ticks`.
    #[inline]
    pub fn time_from_ticks(&self, ticks: u64) -> f64 {
        self.sync_time + ticks as f64 / self.tick_rate
    }

    /// Tick counter value at unix time `t`; zero for times before the epoch.
    #[inline]
    pub fn ticks_from_time(&self, t: f64) -> u64 {
        let ticks = (t - self.sync_time) * self.tick_rate;
        if ticks <= 0.0 {
            0
        } else {
            ticks as u64
        }
    }

    /// Unix time at which the packet counter reads `packets`.
    #[inline]
    pub fn time_from_packets(&self, packets: u64) -> f64 {
        self.sync_time + packets as f64 / self.packet_rate
    }

    /// Packet counter value at unix time `t`; zero for times before the
    /// epoch.
    #[inline]
    pub fn packets_from_time(&self, t: f64) -> u64 {
        let packets = (t - self.sync_time) * self.packet_rate;
        if packets <= 0.0 {
            0
        } else {
            packets as u64
        }
    }

    /// Rescale a tick-counter reading into the packet domain.
    #[inline]
    pub fn packets_from_ticks(&self, ticks: u64) -> u64 {
        (ticks as f64 * self.packet_rate / self.tick_rate) as u64
    }

    /// Counter rate for a domain, in counts per second.
    #[inline]
    pub fn rate(&self, domain: CounterDomain) -> f64 {
        match domain {
            CounterDomain::Ticks => self.tick_rate,
            CounterDomain::Packets => self.packet_rate,
        }
    }

    /// Domain-generic form of the `time_from_*` conversions.
    #[inline]
    pub fn time_from_counter(&self, domain: CounterDomain, count: u64) -> f64 {
        match domain {
            CounterDomain::Ticks => self.time_from_ticks(count),
            CounterDomain::Packets => self.time_from_packets(count),
        }
    }

    /// Domain-generic form of the `*_from_time` conversions.
    #[inline]
    pub fn counter_from_time(&self, domain: CounterDomain, t: f64) -> u64 {
        match domain {
            CounterDomain::Ticks => self.ticks_from_time(t),
            CounterDomain::Packets => self.packets_from_time(t),
        }
    }
}
