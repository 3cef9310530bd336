//! Register naming and bit assignments
//!
//! Symbolic names for the software registers this controller programs.
//! These are this gateware's conventions, not any particular board
//! revision's memory map; the control channel treats names as opaque.

/// Pending flag in the high half of a split 64-bit schedule target. The
/// device latches the full target on the 1 -> 0 transition of this bit.
pub const TARGET_PENDING: u32 = 1 << 31;

/// Armed flag in the producer pulse-count register.
pub const PULSE_ARMED: u32 = 1 << 31;
/// Mask for the pulse count itself.
pub const PULSE_COUNT_MASK: u32 = PULSE_ARMED - 1;

pub mod producer {
    //! Producer-side registers.

    /// Sync control register, written as a whole word.
    pub const SYNC_CTRL: &str = "sync_ctrl";
    pub const CTRL_MASTER_RESET: u32 = 1 << 0;
    pub const CTRL_SOFT_SYNC: u32 = 1 << 1;
    pub const CTRL_TRIGGER_ARM: u32 = 1 << 2;
    pub const CTRL_STATUS_CLEAR: u32 = 1 << 3;

    /// Pulse edges seen since the last arm, with the armed flag on top.
    pub const PULSE_COUNT: &str = "pulse_count";
    /// Ticks counted between the last two pulse edges.
    pub const PULSE_INTERVAL: &str = "pulse_interval";

    /// Tick counter halves.
    pub const TICK_MSW: &str = "tick_msw";
    pub const TICK_LSW: &str = "tick_lsw";

    pub const BOARD_INDEX: &str = "board_index";

    // Input status flags.
    pub const STATUS_LINK_DOWN: u32 = 1 << 17;
    pub const STATUS_LINK_OVERFLOW: u32 = 1 << 16;
    pub const STATUS_REORDER_ERROR: u32 = 1 << 3;
    pub const STATUS_ADC_OVERRANGE: u32 = 1 << 2;
    pub const STATUS_FFT_OVERRANGE: u32 = 1 << 1;
    pub const STATUS_QUANT_OVERRANGE: u32 = 1 << 0;

    pub fn input_status(input: u32) -> String {
        format!("input_status{input}")
    }

    pub fn coarse_delay(input: u32) -> String {
        format!("coarse_delay{input}")
    }

    /// Fine delay pair: rate code then offset code, big-endian i16s.
    pub fn fine_delay(input: u32) -> String {
        format!("fine_delay{input}")
    }

    /// Phase pair: rate code then offset code, big-endian i16s.
    pub fn phase(input: u32) -> String {
        format!("phase{input}")
    }

    pub fn load_target_msw(input: u32) -> String {
        format!("load_target_msw{input}")
    }

    pub fn load_target_lsw(input: u32) -> String {
        format!("load_target_lsw{input}")
    }

    /// Schedule counters: accepted commits in the high half, fired commits
    /// in the low half.
    pub fn load_status(input: u32) -> String {
        format!("load_status{input}")
    }
}

pub mod accumulator {
    //! Accumulator-side registers.

    /// Control register, written as a whole word.
    pub const CTRL: &str = "accum_ctrl";
    pub const CTRL_ACCUM_RESET: u32 = 1 << 0;
    pub const CTRL_COUNTER_RESET: u32 = 1 << 8;
    pub const CTRL_OUTPUT_ENABLE: u32 = 1 << 16;

    /// Restart target halves, shared by all engines on the node.
    pub const RESTART_TARGET_MSW: &str = "restart_target_msw";
    pub const RESTART_TARGET_LSW: &str = "restart_target_lsw";

    /// Accumulation length in hardware batches.
    pub const ACCUM_LENGTH: &str = "accum_length";

    pub fn restart_status(engine: u32) -> String {
        format!("restart_status{engine}")
    }

    pub fn accum_count(engine: u32) -> String {
        format!("accum_count{engine}")
    }

    pub fn accum_err(engine: u32) -> String {
        format!("accum_err{engine}")
    }

    pub fn reorder_count(engine: u32) -> String {
        format!("reorder_count{engine}")
    }

    pub fn reorder_err(engine: u32) -> String {
        format!("reorder_err{engine}")
    }

    pub fn engine_index(engine: u32) -> String {
        format!("engine_index{engine}")
    }

    pub fn link_count(link: u32) -> String {
        format!("link_count{link}")
    }

    pub fn link_err(link: u32) -> String {
        format!("link_err{link}")
    }

    /// Tick count observed at sync on one ingest link.
    pub fn sync_tick(link: u32) -> String {
        format!("sync_tick{link}")
    }

    /// Loopback and ingest tick counts, packed as two big-endian u16s.
    pub fn loopback_tick(link: u32) -> String {
        format!("loopback_tick{link}")
    }

    pub fn tx_count(link: u32) -> String {
        format!("tx_count{link}")
    }

    pub fn rx_count(link: u32) -> String {
        format!("rx_count{link}")
    }
}
