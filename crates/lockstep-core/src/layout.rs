//! Signal-path layout
//!
//! Deterministic arithmetic mapping an antenna/polarization pair to the
//! producer board, board input, and inter-node links that carry it.

use serde::{Deserialize, Serialize};

use crate::{ArrayConfig, LockstepError, LockstepResult};

/// Polarization of one antenna feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    X,
    Y,
}

impl Polarization {
    #[inline]
    pub fn index(self) -> u32 {
        match self {
            Polarization::X => 0,
            Polarization::Y => 1,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Polarization::X => 'x',
            Polarization::Y => 'y',
        }
    }
}

/// Where one antenna/polarization lands in the array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalPath {
    /// Index of the producer board digitizing this feed.
    pub producer_board: u32,
    /// Input index on that producer board.
    pub input: u32,
    /// Link index on the producer side.
    pub producer_link: u32,
    /// Index of the accumulator board this feed's link lands on.
    pub accumulator_board: u32,
    /// Link index on the accumulator side.
    pub accumulator_link: u32,
}

/// Resolve the signal path for an antenna/polarization pair.
pub fn signal_path(
    config: &ArrayConfig,
    antenna: u32,
    pol: Polarization,
) -> LockstepResult<SignalPath> {
    if antenna >= config.n_antennas {
        return Err(LockstepError::UnknownAntenna {
            antenna,
            total: config.n_antennas,
        });
    }

    let link_group = antenna / config.antennas_per_link;
    let producer_board = link_group / config.links_per_producer;
    let producer_link = link_group % config.links_per_producer;
    let accumulator_board = link_group / config.links_per_accumulator;
    let accumulator_link = link_group % config.links_per_accumulator;
    let input = (antenna % config.antennas_per_producer()) * config.n_polarizations + pol.index();

    Ok(SignalPath {
        producer_board,
        input,
        producer_link,
        accumulator_board,
        accumulator_link,
    })
}
