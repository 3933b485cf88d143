//! # Transceiver
//!
//! Request/response correlation over a lossy [`Link`].
//!
//! The radio answers every transfer with whatever the vehicle piggy-backed on
//! its acknowledgement, which is not necessarily the reply to the packet just
//! sent. [`Transceiver::send_and_receive`] keeps polling with ping frames until
//! a reply on the expected port/channel shows up; everything else that arrives
//! for the parameter or logging port is queued in that port's inbox so the
//! TOC tables can consume it later.
//!
//! The wait loop has no upper bound: it ends when the expected reply arrives
//! or when the link reports the device gone. Callers needing bounded latency
//! must watch the link themselves (the replug loop in the binary recreates the
//! whole component tree when the link disappears).

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::TransceiverConfig;
use crate::crtp::decoder::decode_ack;
use crate::crtp::encoder::encode_frame;
use crate::crtp::protocol::*;
use crate::crtp::{Frame, Packet};
use crate::link::{Link, LinkError};

/// Retrying request/response layer over a [`Link`]
pub struct Transceiver<L: Link> {
    link: L,
    retries: u32,
    retry_interval: Duration,
    read_timeout: Duration,
    ack_received: bool,
    param_inbox: VecDeque<Packet>,
    log_inbox: VecDeque<Packet>,
    exchanges: u64,
}

impl<L: Link> std::fmt::Debug for Transceiver<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transceiver")
            .field("retries", &self.retries)
            .field("retry_interval", &self.retry_interval)
            .field("ack_received", &self.ack_received)
            .field("param_inbox", &self.param_inbox.len())
            .field("log_inbox", &self.log_inbox.len())
            .finish_non_exhaustive()
    }
}

impl<L: Link> Transceiver<L> {
    pub fn new(link: L, config: &TransceiverConfig) -> Self {
        Self {
            link,
            retries: config.retries.max(1),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            ack_received: false,
            param_inbox: VecDeque::new(),
            log_inbox: VecDeque::new(),
            exchanges: 0,
        }
    }

    /// Send `packet` and wait for a reply on `port` / `channel`
    ///
    /// The packet is sent once; if the immediate reply does not match, ping
    /// frames are sent every `retry_interval` to collect further replies, and
    /// the original packet is re-sent every `retries` iterations in case the
    /// vehicle never saw it or its reply was lost.
    ///
    /// # Returns
    ///
    /// * `Some(Packet)` - the matching reply
    /// * `None` - the link is no longer present (device removed)
    pub fn send_and_receive(
        &mut self,
        packet: &Packet,
        port: u8,
        channel: u8,
        retries: u32,
        retry_interval: Duration,
    ) -> Option<Packet> {
        let frame = Frame::Packet(packet.clone());
        if let Some(reply) = self.exchange_expecting(&frame, port, channel) {
            return Some(reply);
        }

        let ping = Frame::Ping;
        let retries = retries.max(1);
        let mut iteration: u32 = 0;

        loop {
            if !self.link.is_present() {
                warn!("Link gone while waiting for reply on port {} channel {}", port, channel);
                return None;
            }

            thread::sleep(retry_interval);
            iteration = iteration.wrapping_add(1);

            let next = if iteration % retries == 0 {
                debug!("Re-sending packet for port {} channel {} (iteration {})", port, channel, iteration);
                &frame
            } else {
                &ping
            };

            if let Some(reply) = self.exchange_expecting(next, port, channel) {
                return Some(reply);
            }
        }
    }

    /// [`Transceiver::send_and_receive`] using the configured retry settings
    pub fn request(&mut self, packet: &Packet, port: u8, channel: u8) -> Option<Packet> {
        self.send_and_receive(packet, port, channel, self.retries, self.retry_interval)
    }

    /// Single exchange without retry
    ///
    /// Used for cadence-critical traffic such as setpoints, where a stale or
    /// missing reply is acceptable. Parameter and logging traffic riding on
    /// the reply is queued in the inboxes as usual; the returned packet is only
    /// informational.
    pub fn send(&mut self, packet: &Packet) -> Option<Packet> {
        self.exchange_routed(&Frame::Packet(packet.clone()))
    }

    /// Send a keep-alive ping and collect whatever the vehicle had queued
    pub fn ping(&mut self) -> Option<Packet> {
        self.exchange_routed(&Frame::Ping)
    }

    /// Whether the last transfer was acknowledged by the vehicle
    pub fn ack_received(&self) -> bool {
        self.ack_received
    }

    /// Whether the underlying link is still usable
    pub fn is_link_present(&self) -> bool {
        self.link.is_present()
    }

    /// Total number of frames written to the link
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Take every queued packet for the namespace on `port` (FIFO order)
    pub fn drain_inbox(&mut self, port: u8) -> Vec<Packet> {
        self.inbox_mut(port)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn inbox_len(&self, port: u8) -> usize {
        match port {
            CRTP_PORT_PARAM => self.param_inbox.len(),
            CRTP_PORT_LOG => self.log_inbox.len(),
            _ => 0,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn inbox_mut(&mut self, port: u8) -> Option<&mut VecDeque<Packet>> {
        match port {
            CRTP_PORT_PARAM => Some(&mut self.param_inbox),
            CRTP_PORT_LOG => Some(&mut self.log_inbox),
            _ => None,
        }
    }

    fn exchange_expecting(&mut self, frame: &Frame, port: u8, channel: u8) -> Option<Packet> {
        match self.exchange(frame) {
            Some(reply) if reply.is(port, channel) => Some(reply),
            Some(other) => {
                self.route(other);
                None
            }
            None => None,
        }
    }

    fn exchange_routed(&mut self, frame: &Frame) -> Option<Packet> {
        let reply = self.exchange(frame)?;
        self.route(reply.clone());
        Some(reply)
    }

    /// Write one frame and drain the radio's reply to it
    fn exchange(&mut self, frame: &Frame) -> Option<Packet> {
        let bytes = encode_frame(frame);

        if let Err(e) = self.link.write(&bytes) {
            debug!("Link write failed: {}", e);
            self.ack_received = false;
            return None;
        }
        self.exchanges += 1;
        trace!("Sent {:02X?}", bytes);

        let reply = match self.link.read(RADIO_MAX_REPLY_SIZE, self.read_timeout) {
            Ok(reply) => reply,
            Err(LinkError::Timeout) => {
                self.ack_received = false;
                return None;
            }
            Err(e) => {
                debug!("Link read failed: {}", e);
                self.ack_received = false;
                return None;
            }
        };

        match decode_ack(&reply) {
            Ok(ack) => {
                self.ack_received = ack.ack;
                ack.packet
            }
            Err(e) => {
                warn!("Dropping radio reply: {}", e);
                self.ack_received = false;
                None
            }
        }
    }

    /// Queue traffic that nobody is waiting for
    fn route(&mut self, packet: Packet) {
        match packet.port() {
            CRTP_PORT_CONSOLE => {
                debug!("Console: {}", String::from_utf8_lossy(packet.payload()).trim_end());
            }
            port => match self.inbox_mut(port) {
                Some(inbox) => inbox.push_back(packet),
                None => trace!("Ignoring unsolicited packet on port {}", port),
            },
        }
    }
}
