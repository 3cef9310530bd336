//! In-memory channels for tests
//!
//! `MockChannel` is both a register-file fake and a call spy: every call is
//! recorded in order, reads can be scripted per register, and connectivity
//! failures can be injected.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{ChannelError, ChannelResult, ControlChannel};

/// One recorded control-channel call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Ping,
    ReadWord(String),
    WriteWord(String, u32),
    ReadBuffer { register: String, len: usize, offset: usize },
    WriteBuffer(String, Vec<u8>),
}

#[derive(Default)]
struct MockState {
    registers: HashMap<String, u32>,
    scripted: HashMap<String, VecDeque<u32>>,
    buffers: HashMap<String, Bytes>,
    calls: Vec<Call>,
    failing_pings: u32,
    offline: bool,
}

/// Scriptable in-memory control channel.
#[derive(Default)]
pub struct MockChannel {
    state: Mutex<MockState>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a register with a sticky value.
    pub fn set_register(&self, register: &str, value: u32) {
        self.state
            .lock()
            .registers
            .insert(register.to_string(), value);
    }

    /// Script the values returned by successive reads of `register`,
    /// replacing any previous script; once drained, reads fall back to the
    /// sticky value.
    pub fn script_reads(&self, register: &str, values: &[u32]) {
        let mut state = self.state.lock();
        state
            .scripted
            .insert(register.to_string(), values.iter().copied().collect());
        // The final scripted value becomes the sticky fallback.
        if let Some(last) = values.last() {
            state.registers.insert(register.to_string(), *last);
        }
    }

    pub fn set_buffer(&self, register: &str, data: impl Into<Bytes>) {
        self.state
            .lock()
            .buffers
            .insert(register.to_string(), data.into());
    }

    /// Fail the next `n` pings with an i/o error.
    pub fn fail_pings(&self, n: u32) {
        self.state.lock().failing_pings = n;
    }

    /// Fail every subsequent call.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Ordered values written to one register.
    pub fn writes_to(&self, register: &str) -> Vec<u32> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::WriteWord(reg, value) if reg == register => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Total writes issued over this channel, words and buffers.
    pub fn write_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::WriteWord(..) | Call::WriteBuffer(..)))
            .count()
    }

    /// Current sticky value of a register, if any write or seed set one.
    pub fn register(&self, register: &str) -> Option<u32> {
        self.state.lock().registers.get(register).copied()
    }

    fn check_online(state: &MockState) -> ChannelResult<()> {
        if state.offline {
            Err(ChannelError::Io("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl ControlChannel for MockChannel {
    fn ping(&self) -> ChannelResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Ping);
        Self::check_online(&state)?;
        if state.failing_pings > 0 {
            state.failing_pings -= 1;
            return Err(ChannelError::Io("ping lost".into()));
        }
        Ok(())
    }

    fn read_word(&self, register: &str) -> ChannelResult<u32> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReadWord(register.to_string()));
        Self::check_online(&state)?;
        if let Some(queue) = state.scripted.get_mut(register) {
            if let Some(value) = queue.pop_front() {
                return Ok(value);
            }
        }
        state
            .registers
            .get(register)
            .copied()
            .ok_or_else(|| ChannelError::UnknownRegister(register.to_string()))
    }

    fn write_word(&self, register: &str, value: u32) -> ChannelResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WriteWord(register.to_string(), value));
        Self::check_online(&state)?;
        state.registers.insert(register.to_string(), value);
        Ok(())
    }

    fn read_buffer(&self, register: &str, len: usize, offset: usize) -> ChannelResult<Bytes> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReadBuffer {
            register: register.to_string(),
            len,
            offset,
        });
        Self::check_online(&state)?;
        let data = state
            .buffers
            .get(register)
            .ok_or_else(|| ChannelError::UnknownRegister(register.to_string()))?;
        if offset + len > data.len() {
            return Err(ChannelError::ShortRead {
                register: register.to_string(),
                wanted: len,
                got: data.len().saturating_sub(offset),
            });
        }
        Ok(data.slice(offset..offset + len))
    }

    fn write_buffer(&self, register: &str, payload: &[u8]) -> ChannelResult<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(Call::WriteBuffer(register.to_string(), payload.to_vec()));
        Self::check_online(&state)?;
        state
            .buffers
            .insert(register.to_string(), Bytes::copy_from_slice(payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reads_then_sticky() {
        let chan = MockChannel::new();
        chan.script_reads("counter", &[1, 2, 3]);

        assert_eq!(chan.read_word("counter").unwrap(), 1);
        assert_eq!(chan.read_word("counter").unwrap(), 2);
        assert_eq!(chan.read_word("counter").unwrap(), 3);
        // Script drained; last value sticks.
        assert_eq!(chan.read_word("counter").unwrap(), 3);
    }

    #[test]
    fn test_write_ordering_is_recorded() {
        let chan = MockChannel::new();
        chan.write_word("target_msw", 0x8000_0001).unwrap();
        chan.write_word("target_msw", 0x0000_0001).unwrap();

        assert_eq!(chan.writes_to("target_msw"), vec![0x8000_0001, 0x0000_0001]);
        assert_eq!(chan.write_count(), 2);
    }

    #[test]
    fn test_unknown_register_errors() {
        let chan = MockChannel::new();
        assert!(matches!(
            chan.read_word("nope"),
            Err(ChannelError::UnknownRegister(_))
        ));
    }

    #[test]
    fn test_failing_pings_recover() {
        let chan = MockChannel::new();
        chan.fail_pings(1);
        assert!(chan.ping().is_err());
        assert!(chan.ping().is_ok());
    }
}
