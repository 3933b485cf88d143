//! # CRTP Client Library
//!
//! Host-side client for the Crazy Real-Time Protocol (CRTP) used to control
//! and telemeter small quadrotors over a lossy point-to-point radio link.
//!
//! This library provides the packet codec, a retrying transceiver, discovery
//! of the device-reported parameter and log-variable tables (TOC), logging
//! block management, and the connection state machine that sequences them.

pub mod config;
pub mod connection;
pub mod crtp;
pub mod error;
pub mod link;
pub mod telemetry;
pub mod toc;
pub mod transceiver;
