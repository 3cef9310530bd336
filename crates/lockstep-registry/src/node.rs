//! Per-role node register surfaces

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

use lockstep_channel::{ChannelResult, ControlChannel};
use lockstep_core::{NodeId, NodeRole};

use crate::registers::{accumulator, producer, PULSE_ARMED, PULSE_COUNT_MASK, TARGET_PENDING};
use crate::ScheduleSnapshot;

/// Decoded producer sync-control word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncControl {
    pub master_reset: bool,
    pub soft_sync: bool,
    pub trigger_arm: bool,
    pub status_clear: bool,
}

impl SyncControl {
    pub fn encode(self) -> u32 {
        u32::from(self.master_reset) * producer::CTRL_MASTER_RESET
            | u32::from(self.soft_sync) * producer::CTRL_SOFT_SYNC
            | u32::from(self.trigger_arm) * producer::CTRL_TRIGGER_ARM
            | u32::from(self.status_clear) * producer::CTRL_STATUS_CLEAR
    }

    pub fn decode(word: u32) -> Self {
        SyncControl {
            master_reset: word & producer::CTRL_MASTER_RESET != 0,
            soft_sync: word & producer::CTRL_SOFT_SYNC != 0,
            trigger_arm: word & producer::CTRL_TRIGGER_ARM != 0,
            status_clear: word & producer::CTRL_STATUS_CLEAR != 0,
        }
    }
}

/// Decoded accumulator control word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccumControl {
    pub accum_reset: bool,
    pub counter_reset: bool,
    pub output_enable: bool,
}

impl AccumControl {
    pub fn encode(self) -> u32 {
        u32::from(self.accum_reset) * accumulator::CTRL_ACCUM_RESET
            | u32::from(self.counter_reset) * accumulator::CTRL_COUNTER_RESET
            | u32::from(self.output_enable) * accumulator::CTRL_OUTPUT_ENABLE
    }

    pub fn decode(word: u32) -> Self {
        AccumControl {
            accum_reset: word & accumulator::CTRL_ACCUM_RESET != 0,
            counter_reset: word & accumulator::CTRL_COUNTER_RESET != 0,
            output_enable: word & accumulator::CTRL_OUTPUT_ENABLE != 0,
        }
    }
}

/// Armed flag and pulse count from one producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseStatus {
    /// Still waiting for its trigger edge.
    pub armed: bool,
    /// Pulse edges seen since the last arm; seconds of uptime with a 1 Hz
    /// pulse input.
    pub pulses: u32,
}

/// Per-input stream status flags on a producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputStatus {
    pub link_down: bool,
    pub link_overflow: bool,
    pub reorder_error: bool,
    pub adc_overrange: bool,
    pub fft_overrange: bool,
    pub quant_overrange: bool,
}

impl InputStatus {
    pub fn decode(word: u32) -> Self {
        InputStatus {
            link_down: word & producer::STATUS_LINK_DOWN != 0,
            link_overflow: word & producer::STATUS_LINK_OVERFLOW != 0,
            reorder_error: word & producer::STATUS_REORDER_ERROR != 0,
            adc_overrange: word & producer::STATUS_ADC_OVERRANGE != 0,
            fft_overrange: word & producer::STATUS_FFT_OVERRANGE != 0,
            quant_overrange: word & producer::STATUS_QUANT_OVERRANGE != 0,
        }
    }

    pub fn any_error(self) -> bool {
        self.link_down || self.link_overflow || self.reorder_error
    }
}

/// Read a 64-bit counter split across two registers. The high half is
/// re-read to detect a carry between the two register reads.
fn read_split_counter(
    channel: &dyn ControlChannel,
    msw_reg: &str,
    lsw_reg: &str,
) -> ChannelResult<u64> {
    let msw = channel.read_word(msw_reg)?;
    let mut lsw = channel.read_word(lsw_reg)?;
    let msw2 = channel.read_word(msw_reg)?;
    if msw2 != msw {
        lsw = channel.read_word(lsw_reg)?;
    }
    Ok(u64::from(msw2) << 32 | u64::from(lsw))
}

/// Commit a split 64-bit target with the pending-bit protocol: low half,
/// high half with the pending flag, high half with it cleared. The device
/// only latches on the pending 1 -> 0 transition, so a torn value is never
/// observable.
fn commit_split_target(
    channel: &dyn ControlChannel,
    msw_reg: &str,
    lsw_reg: &str,
    target: u64,
) -> ChannelResult<()> {
    let msw = (target >> 32) as u32 & !TARGET_PENDING;
    channel.write_word(lsw_reg, target as u32)?;
    channel.write_word(msw_reg, msw | TARGET_PENDING)?;
    channel.write_word(msw_reg, msw)?;
    Ok(())
}

/// One spectrum-producing node.
#[derive(Clone)]
pub struct ProducerNode {
    id: NodeId,
    channel: Arc<dyn ControlChannel>,
}

impl ProducerNode {
    pub fn new(id: NodeId, channel: Arc<dyn ControlChannel>) -> Self {
        ProducerNode { id, channel }
    }

    #[inline]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[inline]
    pub fn channel(&self) -> &Arc<dyn ControlChannel> {
        &self.channel
    }

    pub fn write_sync_control(&self, ctrl: SyncControl) -> ChannelResult<()> {
        self.channel.write_word(producer::SYNC_CTRL, ctrl.encode())
    }

    pub fn read_sync_control(&self) -> ChannelResult<SyncControl> {
        Ok(SyncControl::decode(
            self.channel.read_word(producer::SYNC_CTRL)?,
        ))
    }

    pub fn pulse_status(&self) -> ChannelResult<PulseStatus> {
        let word = self.channel.read_word(producer::PULSE_COUNT)?;
        Ok(PulseStatus {
            armed: word & PULSE_ARMED != 0,
            pulses: word & PULSE_COUNT_MASK,
        })
    }

    pub fn pulse_interval(&self) -> ChannelResult<u32> {
        self.channel.read_word(producer::PULSE_INTERVAL)
    }

    pub fn tick_counter(&self) -> ChannelResult<u64> {
        read_split_counter(&*self.channel, producer::TICK_MSW, producer::TICK_LSW)
    }

    pub fn input_status(&self, input: u32) -> ChannelResult<InputStatus> {
        Ok(InputStatus::decode(
            self.channel.read_word(&producer::input_status(input))?,
        ))
    }

    pub fn set_board_index(&self, index: u32) -> ChannelResult<()> {
        self.channel.write_word(producer::BOARD_INDEX, index)
    }

    pub fn set_coarse_delay(&self, input: u32, ticks: i32) -> ChannelResult<()> {
        self.channel
            .write_word(&producer::coarse_delay(input), ticks as u32)
    }

    pub fn write_fine_delay(&self, input: u32, rate_code: i16, offset_code: i16) -> ChannelResult<()> {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_i16(rate_code);
        buf.put_i16(offset_code);
        self.channel.write_buffer(&producer::fine_delay(input), &buf)
    }

    pub fn write_phase(&self, input: u32, rate_code: i16, offset_code: i16) -> ChannelResult<()> {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_i16(rate_code);
        buf.put_i16(offset_code);
        self.channel.write_buffer(&producer::phase(input), &buf)
    }

    pub fn schedule_snapshot(&self, input: u32) -> ChannelResult<ScheduleSnapshot> {
        Ok(ScheduleSnapshot::decode(
            self.channel.read_word(&producer::load_status(input))?,
        ))
    }

    pub fn commit_load_target(&self, input: u32, target: u64) -> ChannelResult<()> {
        commit_split_target(
            &*self.channel,
            &producer::load_target_msw(input),
            &producer::load_target_lsw(input),
            target,
        )
    }
}

/// One correlation/accumulation node.
#[derive(Clone)]
pub struct AccumulatorNode {
    id: NodeId,
    channel: Arc<dyn ControlChannel>,
}

impl AccumulatorNode {
    pub fn new(id: NodeId, channel: Arc<dyn ControlChannel>) -> Self {
        AccumulatorNode { id, channel }
    }

    #[inline]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[inline]
    pub fn channel(&self) -> &Arc<dyn ControlChannel> {
        &self.channel
    }

    pub fn write_control(&self, ctrl: AccumControl) -> ChannelResult<()> {
        self.channel.write_word(accumulator::CTRL, ctrl.encode())
    }

    pub fn read_control(&self) -> ChannelResult<AccumControl> {
        Ok(AccumControl::decode(
            self.channel.read_word(accumulator::CTRL)?,
        ))
    }

    pub fn restart_snapshot(&self, engine: u32) -> ChannelResult<ScheduleSnapshot> {
        Ok(ScheduleSnapshot::decode(
            self.channel.read_word(&accumulator::restart_status(engine))?,
        ))
    }

    pub fn set_accumulation_length(&self, batches: u32) -> ChannelResult<()> {
        self.channel.write_word(accumulator::ACCUM_LENGTH, batches)
    }

    pub fn set_engine_index(&self, engine: u32, global_index: u32) -> ChannelResult<()> {
        self.channel
            .write_word(&accumulator::engine_index(engine), global_index)
    }

    pub fn accum_count(&self, engine: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::accum_count(engine))
    }

    pub fn accum_err(&self, engine: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::accum_err(engine))
    }

    pub fn reorder_count(&self, engine: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::reorder_count(engine))
    }

    pub fn reorder_err(&self, engine: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::reorder_err(engine))
    }

    pub fn link_count(&self, link: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::link_count(link))
    }

    pub fn link_err(&self, link: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::link_err(link))
    }

    pub fn sync_tick(&self, link: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::sync_tick(link))
    }

    /// Loopback-side and ingest-side tick counts on one link.
    pub fn loopback_ticks(&self, link: u32) -> ChannelResult<(u16, u16)> {
        let word = self.channel.read_word(&accumulator::loopback_tick(link))?;
        let mut buf = &word.to_be_bytes()[..];
        let loopback = buf.get_u16();
        let ingest = buf.get_u16();
        Ok((loopback, ingest))
    }

    pub fn tx_count(&self, link: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::tx_count(link))
    }

    pub fn rx_count(&self, link: u32) -> ChannelResult<u32> {
        self.channel.read_word(&accumulator::rx_count(link))
    }
}

/// A node of either role.
#[derive(Clone)]
pub enum Node {
    Producer(ProducerNode),
    Accumulator(AccumulatorNode),
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Producer(n) => n.id(),
            Node::Accumulator(n) => n.id(),
        }
    }

    pub fn role(&self) -> NodeRole {
        match self {
            Node::Producer(_) => NodeRole::Producer,
            Node::Accumulator(_) => NodeRole::Accumulator,
        }
    }

    pub fn channel(&self) -> &Arc<dyn ControlChannel> {
        match self {
            Node::Producer(n) => n.channel(),
            Node::Accumulator(n) => n.channel(),
        }
    }
}
