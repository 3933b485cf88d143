//! # CRTP Protocol Module
//!
//! Implementation of the Crazy Real-Time Protocol packet layer.
//!
//! This module handles:
//! - Header byte packing (4-bit port, 2-bit channel) and the ping sentinel
//! - Radio ack framing of replies (status byte + CRTP frame)
//! - Command payloads for the TOC, parameter, logging and commander ports
//! - Parsing of TOC item replies

pub mod protocol;
pub mod encoder;
pub mod decoder;

pub use protocol::{Frame, Packet};
