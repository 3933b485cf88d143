//! # CRTP Packet Encoder
//!
//! Encodes packets into wire bytes and builds the command payloads of the
//! TOC, parameter, logging and commander sub-protocols.

use bytes::{BufMut, BytesMut};

use super::protocol::*;

/// Pack port and channel into a header byte
///
/// Layout: `(port << 4) | 0b1100 | channel`.
///
/// # Panics
///
/// Panics if `port > 15` or `channel > 3`.
pub fn encode_header(port: u8, channel: u8) -> u8 {
    assert!(port <= CRTP_PORT_MAX, "CRTP port {} out of range", port);
    assert!(channel <= CRTP_CHANNEL_MAX, "CRTP channel {} out of range", channel);

    (port << 4) | CRTP_HEADER_FIXED_BITS | channel
}

/// Encode port, channel and payload into a complete frame
///
/// Payloads are not length-prefixed: the link carries one frame per transfer.
///
/// # Examples
///
/// ```
/// use crtp_client::crtp::encoder::encode;
///
/// let bytes = encode(0x2, 1, &[7, 0x2A]);
/// assert_eq!(bytes, vec![0x2D, 7, 0x2A]);
/// ```
pub fn encode(port: u8, channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(encode_header(port, channel));
    frame.extend_from_slice(payload);
    frame
}

/// Encode the keep-alive ping frame (exactly one byte, `0xFF`)
pub fn encode_ping() -> Vec<u8> {
    vec![CRTP_PING_BYTE]
}

/// Encode a packet
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    encode(packet.port(), packet.channel(), packet.payload())
}

/// Encode any frame, ping included
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::Ping => encode_ping(),
        Frame::Packet(packet) => encode_packet(packet),
    }
}

/// TOC "get info" request for the namespace on `port`
pub fn toc_get_info(port: u8) -> Packet {
    Packet::new(port, CRTP_CHANNEL_TOC, vec![TOC_CMD_GET_INFO])
}

/// TOC "get item by index" request
///
/// Index 0 is sent as the bare command byte, as the vehicle expects for the
/// initial item.
pub fn toc_get_item(port: u8, index: u8) -> Packet {
    let payload = if index == 0 {
        vec![TOC_CMD_GET_ITEM]
    } else {
        vec![TOC_CMD_GET_ITEM, index]
    };

    Packet::new(port, CRTP_CHANNEL_TOC, payload)
}

/// Parameter value request
pub fn param_read(id: u8) -> Packet {
    Packet::new(CRTP_PORT_PARAM, CRTP_CHANNEL_READ, vec![id])
}

/// Parameter write: `[id, value_bytes...]`
pub fn param_write(id: u8, value: &[u8]) -> Packet {
    let mut payload = Vec::with_capacity(1 + value.len());
    payload.push(id);
    payload.extend_from_slice(value);

    Packet::new(CRTP_PORT_PARAM, CRTP_CHANNEL_WRITE, payload)
}

/// Logging control: create block `[0x00, block_id, period]`
pub fn log_create_block(block_id: u8, period_tenths_ms: u8) -> Packet {
    log_control(vec![LOG_CMD_CREATE_BLOCK, block_id, period_tenths_ms])
}

/// Logging control: append variable `[0x01, block_id, type_tag, element_id]`
pub fn log_append_variable(block_id: u8, type_tag: u8, element_id: u8) -> Packet {
    log_control(vec![LOG_CMD_APPEND_VARIABLE, block_id, type_tag, element_id])
}

/// Logging control: delete block `[0x02, block_id]`
pub fn log_delete_block(block_id: u8) -> Packet {
    log_control(vec![LOG_CMD_DELETE_BLOCK, block_id])
}

/// Logging control: start sampling `[0x03, block_id, period]`
pub fn log_start_block(block_id: u8, period_tenths_ms: u8) -> Packet {
    log_control(vec![LOG_CMD_START_BLOCK, block_id, period_tenths_ms])
}

fn log_control(payload: Vec<u8>) -> Packet {
    Packet::new(CRTP_PORT_LOG, CRTP_CHANNEL_WRITE, payload)
}

/// Commander setpoint
///
/// Pitch is sign-inverted before sending, matching the vehicle's frame
/// convention. Values are little-endian.
pub fn setpoint(roll: f32, pitch: f32, yaw: f32, thrust: u16) -> Packet {
    let mut payload = BytesMut::with_capacity(SETPOINT_PAYLOAD_SIZE);
    payload.put_f32_le(roll);
    payload.put_f32_le(-pitch);
    payload.put_f32_le(yaw);
    payload.put_u16_le(thrust);

    Packet::new(CRTP_PORT_COMMANDER, 0, payload.freeze())
}
