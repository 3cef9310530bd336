//! The control-channel trait

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Control-channel failures.
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("i/o failure: {0}")]
    Io(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown register {0}")]
    UnknownRegister(String),

    #[error("short read from {register}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        register: String,
        wanted: usize,
        got: usize,
    },

    #[error("capture hardware fault: {0}")]
    CaptureFault(String),
}

/// Result type for control-channel calls.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// One synchronous request/response session with a node.
///
/// Calls block until the device answers or the implementation's configured
/// per-call timeout expires; a timeout surfaces as
/// [`ChannelError::Timeout`] and is treated as a node failure by callers.
/// Implementations must be safe to share across threads, since batch
/// operations fan calls out concurrently.
pub trait ControlChannel: Send + Sync {
    /// Connection-level liveness probe.
    fn ping(&self) -> ChannelResult<()>;

    /// Read one 32-bit software register.
    fn read_word(&self, register: &str) -> ChannelResult<u32>;

    /// Write one 32-bit software register.
    fn write_word(&self, register: &str, value: u32) -> ChannelResult<()>;

    /// Read `len` bytes from a bulk buffer, starting at `offset`.
    fn read_buffer(&self, register: &str, len: usize, offset: usize) -> ChannelResult<Bytes>;

    /// Write a packed payload to a bulk buffer.
    fn write_buffer(&self, register: &str, payload: &[u8]) -> ChannelResult<()>;
}
