//! One-shot capture buffers ("snap" devices)
//!
//! A snap device records a burst of pipeline words into block RAM when
//! triggered, optionally delayed by a number of valid samples or running in
//! circular mode. Completion is signaled by a busy flag in the address
//! register; the low bits then hold the last captured address.
//!
//! This is a blocking helper built purely on [`ControlChannel`] primitives;
//! callers on an async runtime should run it on a blocking task.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::{ChannelError, ChannelResult, ControlChannel};

const CTRL_ENABLE: u32 = 1 << 0;
const CTRL_MANUAL_TRIGGER: u32 = 1 << 1;
const CTRL_MANUAL_VALID: u32 = 1 << 2;
const CTRL_CIRCULAR: u32 = 1 << 3;

const ADDR_BUSY: u32 = 1 << 31;
const ADDR_MASK: u32 = ADDR_BUSY - 1;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Parameters for one snap capture.
#[derive(Clone, Debug)]
pub struct SnapRequest {
    /// Name of the snap device.
    pub device: String,
    /// Block RAM components to read back, in order.
    pub buffers: Vec<String>,
    /// Trigger immediately instead of waiting for the hardware trigger.
    pub manual_trigger: bool,
    /// Treat every cycle as a valid sample.
    pub manual_valid: bool,
    /// Bound on how long to wait for the capture to settle.
    pub wait: Duration,
    /// Skip this many valid samples after the trigger before capturing.
    /// Requires hardware support for offset captures.
    pub offset: Option<u32>,
    /// Keep overwriting until the trigger, then stop.
    pub circular: bool,
}

impl SnapRequest {
    pub fn new(device: impl Into<String>, buffers: &[&str]) -> Self {
        SnapRequest {
            device: device.into(),
            buffers: buffers.iter().map(|b| b.to_string()).collect(),
            manual_trigger: false,
            manual_valid: false,
            wait: Duration::from_secs(1),
            offset: None,
            circular: false,
        }
    }
}

/// Result of one snap capture.
#[derive(Clone, Debug)]
pub struct SnapCapture {
    /// Words captured; zero when the device never settled.
    pub length: usize,
    /// Valid samples elapsed between the trigger and the capture start.
    pub offset: u64,
    /// Raw contents of each requested block RAM, in request order. Empty
    /// when `length` is zero.
    pub data: Vec<Bytes>,
}

/// Trigger a snap device and read back what it captured.
pub fn capture(channel: &dyn ControlChannel, req: &SnapRequest) -> ChannelResult<SnapCapture> {
    let ctrl_reg = format!("{}_ctrl", req.device);
    let addr_reg = format!("{}_addr", req.device);

    if let Some(offset) = req.offset {
        channel.write_word(&format!("{}_trig_offset", req.device), offset)?;
    }

    let mut ctrl = 0;
    if req.manual_trigger {
        ctrl |= CTRL_MANUAL_TRIGGER;
    }
    if req.manual_valid {
        ctrl |= CTRL_MANUAL_VALID;
    }
    if req.circular {
        ctrl |= CTRL_CIRCULAR;
    }

    // The capture starts on the 0 -> 1 transition of the enable bit, so the
    // disabled control word always goes first.
    channel.write_word(&ctrl_reg, ctrl)?;
    channel.write_word(&ctrl_reg, ctrl | CTRL_ENABLE)?;

    let deadline = Instant::now() + req.wait;
    let mut addr = channel.read_word(&addr_reg)?;
    while addr & ADDR_BUSY != 0 && Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
        addr = channel.read_word(&addr_reg)?;
    }

    let captured = addr & ADDR_MASK;
    // If the address is still moving the device never finished; report an
    // empty capture rather than tearing the buffer.
    let recheck = channel.read_word(&addr_reg)?;
    if addr & ADDR_BUSY != 0 || recheck & ADDR_MASK != captured || captured == 0 {
        tracing::warn!(device = %req.device, "snap capture did not settle");
        return Ok(SnapCapture {
            length: 0,
            offset: 0,
            data: Vec::new(),
        });
    }
    let length = captured as usize + 1;

    let offset = if (req.circular || req.offset.is_some()) && !req.manual_trigger {
        let valids = channel.read_word(&format!("{}_valid_count", req.device))?;
        let start = i64::from(valids) + i64::from(req.offset.unwrap_or(0)) - length as i64;
        if start < 0 {
            return Err(ChannelError::CaptureFault(format!(
                "{}: capture start underflow ({start})",
                req.device
            )));
        }
        start as u64
    } else {
        0
    };

    let mut data = Vec::with_capacity(req.buffers.len());
    for bram in &req.buffers {
        let reg = format!("{}_{}", req.device, bram);
        data.push(channel.read_buffer(&reg, length * 4, 0)?);
    }

    Ok(SnapCapture {
        length,
        offset,
        data,
    })
}
