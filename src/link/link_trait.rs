//! Trait abstraction for the raw radio link to enable testing

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Transport-level failures reported by a [`Link`]
#[derive(Debug, Error)]
pub enum LinkError {
    /// Nothing arrived (or could be sent) within the timeout
    #[error("Link timed out")]
    Timeout,

    /// The device went away (unplugged, peer gone)
    #[error("Link disconnected")]
    Disconnected,

    /// Any other I/O failure
    #[error("Link I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Raw byte transport carrying one CRTP frame per transfer
///
/// Every write to the radio is answered by exactly one reply transfer
/// (`[status, frame...]`), which the caller drains with [`Link::read`].
/// Opening and configuring the physical device is the implementor's job.
#[cfg_attr(test, mockall::automock)]
pub trait Link {
    /// Send one frame (blocks up to the write timeout)
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Receive one transfer of at most `max_len` bytes
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    /// Whether the device is still there
    fn is_present(&self) -> bool;
}
