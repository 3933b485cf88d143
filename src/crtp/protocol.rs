//! # CRTP Protocol Constants and Types
//!
//! Core protocol definitions for CRTP communication.

use bytes::Bytes;

/// Console port (text printed by the vehicle)
pub const CRTP_PORT_CONSOLE: u8 = 0x0;

/// Parameter port
pub const CRTP_PORT_PARAM: u8 = 0x2;

/// Commander (setpoint) port
pub const CRTP_PORT_COMMANDER: u8 = 0x3;

/// Logging port
pub const CRTP_PORT_LOG: u8 = 0x5;

/// Link-control port
pub const CRTP_PORT_LINK: u8 = 0xF;

/// Highest valid port number (4 bits)
pub const CRTP_PORT_MAX: u8 = 0x0F;

/// Highest valid channel number (2 bits)
pub const CRTP_CHANNEL_MAX: u8 = 0x03;

/// TOC channel (shared by parameter and logging ports)
pub const CRTP_CHANNEL_TOC: u8 = 0;

/// Write channel for parameters, control channel for logging
pub const CRTP_CHANNEL_WRITE: u8 = 1;

/// Read channel for parameters, sample stream for logging
pub const CRTP_CHANNEL_READ: u8 = 2;

/// Fixed header bits set on every non-ping packet
pub const CRTP_HEADER_FIXED_BITS: u8 = 0b0000_1100;

/// Header byte of the keep-alive ping frame
pub const CRTP_PING_BYTE: u8 = 0xFF;

/// TOC command: get item by index
pub const TOC_CMD_GET_ITEM: u8 = 0x00;

/// TOC command: get info (item count)
pub const TOC_CMD_GET_INFO: u8 = 0x01;

/// Logging control command: create block
pub const LOG_CMD_CREATE_BLOCK: u8 = 0x00;

/// Logging control command: append variable to block
pub const LOG_CMD_APPEND_VARIABLE: u8 = 0x01;

/// Logging control command: delete block
pub const LOG_CMD_DELETE_BLOCK: u8 = 0x02;

/// Logging control command: start block sampling
pub const LOG_CMD_START_BLOCK: u8 = 0x03;

/// Status byte of a successful logging control reply
pub const LOG_STATUS_OK: u8 = 0x00;

/// Parameter write acknowledgement payload
pub const PARAM_ACK: u8 = 0x00;

/// Radio status bit: the vehicle acknowledged the last packet
pub const RADIO_STATUS_ACK: u8 = 0x01;

/// Largest reply the radio hands back per transfer (status + frame)
pub const RADIO_MAX_REPLY_SIZE: usize = 64;

/// Bytes preceding the values of a log sample payload (block id + 24-bit timestamp)
pub const LOG_SAMPLE_HEADER_SIZE: usize = 4;

/// Setpoint payload size (3 × f32 + u16)
pub const SETPOINT_PAYLOAD_SIZE: usize = 14;

/// A single CRTP packet addressed by port and channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    port: u8,
    channel: u8,
    payload: Bytes,
}

impl Packet {
    /// Create a new packet
    ///
    /// # Panics
    ///
    /// Panics if `port > 15` or `channel > 3`. Addressing is fixed by the
    /// protocol, so an out-of-range value is a programming error.
    pub fn new(port: u8, channel: u8, payload: impl Into<Bytes>) -> Self {
        assert!(port <= CRTP_PORT_MAX, "CRTP port {} out of range", port);
        assert!(channel <= CRTP_CHANNEL_MAX, "CRTP channel {} out of range", channel);

        Self {
            port,
            channel,
            payload: payload.into(),
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this packet is addressed to `port` / `channel`
    pub fn is(&self, port: u8, channel: u8) -> bool {
        self.port == port && self.channel == channel
    }
}

/// Anything that can travel over the link: a data packet or the ping sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alive frame soliciting a reply without touching vehicle state
    Ping,
    /// Regular addressed packet
    Packet(Packet),
}

/// One entry of a TOC item reply `[0x00, id, type_tag, group\0name\0]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocItem {
    /// Device-assigned element id
    pub id: u8,

    /// Raw type tag (value kind in the low nibble, flags in the high nibble)
    pub type_tag: u8,

    /// Group part of the full name
    pub group: String,

    /// Identifier part of the full name
    pub name: String,
}

/// Header of a streamed log sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSampleHeader {
    /// Logging block the sample belongs to
    pub block_id: u8,

    /// Vehicle timestamp in milliseconds (24-bit, wraps)
    pub timestamp_ms: u32,
}

impl From<Packet> for Frame {
    fn from(packet: Packet) -> Self {
        Frame::Packet(packet)
    }
}
