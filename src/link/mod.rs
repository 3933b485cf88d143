//! # Link Module
//!
//! Raw byte transport between the host and the radio.
//!
//! This module handles:
//! - The [`Link`] contract consumed by the transceiver
//! - A UDP datagram link to a radio bridge or simulator speaking the radio's
//!   ack framing (one CRTP frame per datagram, replies prefixed by a status byte)
//! - Mapping socket failures onto timeouts and device removal
//!
//! The USB dongle itself is driven elsewhere; anything that can move one frame
//! per transfer can implement [`Link`].

mod link_trait;

#[cfg(test)]
pub mod sim;

pub use link_trait::{Link, LinkError};

#[cfg(test)]
pub use link_trait::MockLink;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{CrtpError, Result};

/// Smallest read timeout handed to the socket (zero means "block forever" there)
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// UDP link to a radio bridge
///
/// The socket is connected to the bridge address so only its datagrams are
/// received and ICMP "port unreachable" surfaces as a refused connection,
/// which marks the link absent.
pub struct UdpLink {
    socket: UdpSocket,
    remote: SocketAddr,
    present: bool,
}

impl std::fmt::Debug for UdpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpLink")
            .field("remote", &self.remote)
            .field("present", &self.present)
            .finish_non_exhaustive()
    }
}

impl UdpLink {
    /// Open a link using the `[link]` configuration section
    ///
    /// # Errors
    ///
    /// Returns error if an address does not resolve or the socket cannot be
    /// bound, connected or configured.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crtp_client::config::LinkConfig;
    /// use crtp_client::link::UdpLink;
    ///
    /// let link = UdpLink::connect(&LinkConfig::default())?;
    /// println!("Talking to {}", link.remote());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn connect(config: &LinkConfig) -> Result<Self> {
        let remote = resolve(&config.address)?;
        let local = resolve(&config.bind_address)?;

        debug!("Binding UDP link on {} for {}", local, remote);
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        socket.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;

        info!("UDP link ready: {} -> {}", socket.local_addr()?, remote);

        Ok(Self {
            socket,
            remote,
            present: true,
        })
    }

    /// Address of the radio bridge
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    fn map_error(&mut self, e: io::Error) -> LinkError {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected => {
                if self.present {
                    warn!("Radio bridge at {} went away: {}", self.remote, e);
                }
                self.present = false;
                LinkError::Disconnected
            }
            _ => LinkError::Io(e),
        }
    }
}

impl Link for UdpLink {
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), LinkError> {
        match self.socket.send(data) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_error(e)),
        }
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> std::result::Result<Vec<u8>, LinkError> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))
            .map_err(LinkError::Io)?;

        let mut buf = vec![0u8; max_len];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(self.map_error(e)),
        }
    }

    fn is_present(&self) -> bool {
        self.present
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| CrtpError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Address {} did not resolve", address),
        )))
}
