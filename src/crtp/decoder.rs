//! # CRTP Packet Decoder
//!
//! Decodes frames, radio ack replies, and the structured replies of the TOC
//! and logging sub-protocols.

use bytes::Bytes;

use super::protocol::*;
use crate::error::{CrtpError, Result};

/// Reply handed back by the radio for every transfer
///
/// The radio prefixes each reply with a status byte whose lowest bit tells
/// whether the vehicle acknowledged the packet just sent. Whatever the vehicle
/// piggy-backed on the acknowledgement follows as a regular frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// The vehicle acknowledged the last transmitted frame
    pub ack: bool,

    /// Packet carried on the acknowledgement, if any
    pub packet: Option<Packet>,
}

/// Split a header byte into `(port, channel)`
pub fn decode_header(header: u8) -> (u8, u8) {
    ((header & 0xF0) >> 4, header & CRTP_CHANNEL_MAX)
}

/// Decode a complete frame
///
/// A frame whose header is `0xFF` is the ping sentinel and is returned as
/// [`Frame::Ping`], never as port 15 / channel 3.
///
/// # Errors
///
/// Returns error if the frame is empty.
pub fn decode(frame: &[u8]) -> Result<Frame> {
    let (&header, payload) = frame
        .split_first()
        .ok_or_else(|| CrtpError::Decode("Empty frame".to_string()))?;

    if header == CRTP_PING_BYTE {
        return Ok(Frame::Ping);
    }

    let (port, channel) = decode_header(header);
    Ok(Frame::Packet(Packet::new(
        port,
        channel,
        Bytes::copy_from_slice(payload),
    )))
}

/// Decode a radio reply `[status, frame...]`
///
/// # Errors
///
/// Returns error if the reply does not even carry the status byte.
pub fn decode_ack(reply: &[u8]) -> Result<AckFrame> {
    let (&status, rest) = reply
        .split_first()
        .ok_or_else(|| CrtpError::Decode("Empty radio reply".to_string()))?;

    let packet = if rest.is_empty() {
        None
    } else {
        match decode(rest)? {
            Frame::Packet(packet) => Some(packet),
            Frame::Ping => None,
        }
    };

    Ok(AckFrame {
        ack: status & RADIO_STATUS_ACK != 0,
        packet,
    })
}

/// Decode a TOC "get info" reply `[0x01, item_count, ...]`
pub fn decode_toc_info(payload: &[u8]) -> Result<u8> {
    match payload {
        [TOC_CMD_GET_INFO, count, ..] => Ok(*count),
        _ => Err(CrtpError::Protocol(format!(
            "Unexpected TOC info reply: {:02X?}",
            payload
        ))),
    }
}

/// Decode a TOC item reply `[0x00, id, type_tag, group\0name\0]`
///
/// # Errors
///
/// Returns error if the command byte is wrong, the reply is truncated, or
/// either string is missing its NUL terminator or is not valid UTF-8.
pub fn decode_toc_item(payload: &[u8]) -> Result<TocItem> {
    let (id, type_tag, strings) = match payload {
        [TOC_CMD_GET_ITEM, id, type_tag, strings @ ..] => (*id, *type_tag, strings),
        _ => {
            return Err(CrtpError::Decode(format!(
                "Malformed TOC item reply: {:02X?}",
                payload
            )))
        }
    };

    let (group, rest) = take_cstr(strings)?;
    let (name, _) = take_cstr(rest)?;

    Ok(TocItem {
        id,
        type_tag,
        group,
        name,
    })
}

/// Take one NUL-terminated string off the front of `bytes`
fn take_cstr(bytes: &[u8]) -> Result<(String, &[u8])> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| CrtpError::Decode("Missing NUL terminator in TOC item".to_string()))?;

    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|e| CrtpError::Decode(format!("Invalid TOC item name: {}", e)))?;

    Ok((text.to_string(), &bytes[end + 1..]))
}

/// Check a logging control reply `[command, block_id, status]`
///
/// # Errors
///
/// Returns error if the reply belongs to another command or block, or if the
/// vehicle reported a non-zero status.
pub fn decode_log_control_reply(payload: &[u8], command: u8, block_id: u8) -> Result<()> {
    match payload {
        [cmd, id, LOG_STATUS_OK, ..] if *cmd == command && *id == block_id => Ok(()),
        [cmd, id, status, ..] if *cmd == command && *id == block_id => Err(CrtpError::Protocol(
            format!("Logging command 0x{:02X} on block {} failed with status {}", command, block_id, status),
        )),
        _ => Err(CrtpError::Protocol(format!(
            "Unexpected logging control reply for command 0x{:02X}: {:02X?}",
            command, payload
        ))),
    }
}

/// Split a streamed log sample into its header and value bytes
///
/// # Errors
///
/// Returns error if the payload is shorter than the sample header.
pub fn decode_log_sample(payload: &[u8]) -> Result<(LogSampleHeader, &[u8])> {
    if payload.len() < LOG_SAMPLE_HEADER_SIZE {
        return Err(CrtpError::Decode(format!(
            "Log sample too short: {} bytes",
            payload.len()
        )));
    }

    let header = LogSampleHeader {
        block_id: payload[0],
        timestamp_ms: u32::from_le_bytes([payload[1], payload[2], payload[3], 0]),
    };

    Ok((header, &payload[LOG_SAMPLE_HEADER_SIZE..]))
}
