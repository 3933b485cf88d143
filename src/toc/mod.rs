//! # TOC Module
//!
//! Device-reported schema of one namespace (parameters or log variables).
//!
//! This module handles:
//! - Discovering the element count and every element by index
//! - Name and id lookup
//! - Typed reads and parameter writes against the cached element values
//! - Logging block lifecycle on the vehicle
//! - Applying parameter replies and streamed log samples from the inbox

mod block;
mod element;

pub use block::{period_for_frequency, LoggingBlock};
pub use element::{f16_to_f32, TocElement, TocValue, ValueKind, READ_ONLY_FLAG};

use tracing::{debug, info, trace, warn};

use crate::crtp::decoder::{decode_log_control_reply, decode_log_sample, decode_toc_info, decode_toc_item};
use crate::crtp::encoder::{
    log_append_variable, log_create_block, log_delete_block, log_start_block, param_read,
    param_write, toc_get_info, toc_get_item,
};
use crate::crtp::protocol::*;
use crate::crtp::Packet;
use crate::error::{CrtpError, Result};
use crate::link::Link;
use crate::transceiver::Transceiver;

/// Outcome of applying a batch of inbox packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Parameter replies and log samples stored
    pub applied: usize,
    /// Packets rejected as malformed or referring to unknown ids
    pub skipped: usize,
}

/// Table Of Contents for one namespace
#[derive(Debug, Clone)]
pub struct Toc {
    port: u8,
    item_count: Option<u8>,
    elements: Vec<TocElement>,
    blocks: Vec<LoggingBlock>,
}

impl Toc {
    /// Empty table for the namespace on `port`
    pub fn new(port: u8) -> Self {
        Self {
            port,
            item_count: None,
            elements: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn parameters() -> Self {
        Self::new(CRTP_PORT_PARAM)
    }

    pub fn log_variables() -> Self {
        Self::new(CRTP_PORT_LOG)
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    fn is_parameters(&self) -> bool {
        self.port == CRTP_PORT_PARAM
    }

    /// Element count reported by the vehicle, once known
    pub fn item_count(&self) -> Option<u8> {
        self.item_count
    }

    /// Every advertised element has been discovered
    pub fn is_populated(&self) -> bool {
        self.item_count
            .map_or(false, |count| self.elements.len() == count as usize)
    }

    pub fn elements(&self) -> &[TocElement] {
        &self.elements
    }

    /// Ask the vehicle how many elements this namespace has
    ///
    /// # Errors
    ///
    /// Returns [`CrtpError::LinkLost`] if the link disappears, or a protocol
    /// error if the reply is not an info reply.
    pub fn request_metadata<L: Link>(&mut self, radio: &mut Transceiver<L>) -> Result<()> {
        let reply = radio
            .request(&toc_get_info(self.port), self.port, CRTP_CHANNEL_TOC)
            .ok_or(CrtpError::LinkLost)?;

        let count = decode_toc_info(reply.payload())?;
        debug!("TOC on port {} has {} items", self.port, count);
        self.item_count = Some(count);
        Ok(())
    }

    /// Discover every element by index
    ///
    /// Parameter values are pulled right after each item since the vehicle
    /// never streams them. Malformed item replies are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the metadata is unknown or the link disappears.
    pub fn request_all_items<L: Link>(&mut self, radio: &mut Transceiver<L>) -> Result<()> {
        let count = self.item_count.ok_or_else(|| {
            CrtpError::Protocol(format!("TOC count for port {} not requested yet", self.port))
        })?;

        for index in 0..count {
            let item = match self.request_item(radio, index)? {
                Some(item) => item,
                None => continue,
            };

            trace!("TOC item {}: {}.{} (0x{:02X})", item.id, item.group, item.name, item.type_tag);
            let id = item.id;
            self.upsert(item.into());

            if self.is_parameters() {
                self.pull_parameter(radio, id)?;
            }
        }

        info!(
            "Discovered {}/{} elements on port {}",
            self.elements.len(),
            count,
            self.port
        );
        Ok(())
    }

    /// Fetch item `index`, skipping late replies to earlier item requests
    ///
    /// Ids are dense from 0, so a decoded item with another id answers a
    /// request that was re-sent before. `None` means the reply was malformed.
    fn request_item<L: Link>(&self, radio: &mut Transceiver<L>, index: u8) -> Result<Option<TocItem>> {
        let packet = toc_get_item(self.port, index);
        loop {
            let reply = radio
                .request(&packet, self.port, CRTP_CHANNEL_TOC)
                .ok_or(CrtpError::LinkLost)?;

            match decode_toc_item(reply.payload()) {
                Ok(item) if item.id == index => return Ok(Some(item)),
                Ok(item) => trace!("Skipping stale TOC item {} while waiting for {}", item.id, index),
                Err(e) => {
                    warn!("Skipping TOC item {} on port {}: {}", index, self.port, e);
                    return Ok(None);
                }
            }
        }
    }

    fn upsert(&mut self, element: TocElement) {
        match self.elements.iter_mut().find(|e| e.id == element.id) {
            Some(existing) => *existing = element,
            None => self.elements.push(element),
        }
    }

    pub fn lookup_by_name(&self, full_name: &str) -> Option<&TocElement> {
        self.elements.iter().find(|e| e.matches(full_name))
    }

    pub fn lookup_by_id(&self, id: u8) -> Option<&TocElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn element(&self, full_name: &str) -> Result<&TocElement> {
        self.lookup_by_name(full_name)
            .ok_or_else(|| CrtpError::UnknownElement(full_name.to_string()))
    }

    /// Last known value of `full_name` as `T`
    ///
    /// Half-float elements are stored widened and read as `f32`.
    ///
    /// # Errors
    ///
    /// - [`CrtpError::UnknownElement`] if no such element exists
    /// - [`CrtpError::TypeMismatch`] if `T` does not match the element's type
    /// - [`CrtpError::NoValue`] if no value has been received yet
    pub fn get_value<T: TocValue>(&self, full_name: &str) -> Result<T> {
        let element = self.element(full_name)?;
        if element.kind().map(|k| k.stored()) != Some(T::KIND) {
            return Err(type_mismatch::<T>(element));
        }

        let raw = element
            .raw()
            .ok_or_else(|| CrtpError::NoValue(full_name.to_string()))?;
        T::decode_le(raw).ok_or_else(|| {
            CrtpError::Decode(format!("Stored value of {} is truncated", full_name))
        })
    }

    /// Last known value of `full_name` whatever its type
    pub fn value_as_f64(&self, full_name: &str) -> Result<f64> {
        let element = self.element(full_name)?;
        let kind = element.kind().ok_or_else(|| {
            CrtpError::Protocol(format!("{} has unknown type 0x{:02X}", full_name, element.type_tag))
        })?;
        let raw = element
            .raw()
            .ok_or_else(|| CrtpError::NoValue(full_name.to_string()))?;

        kind.stored_as_f64(raw).ok_or_else(|| {
            CrtpError::Decode(format!("Stored value of {} is truncated", full_name))
        })
    }

    /// Write a parameter on the vehicle
    ///
    /// The value is stored locally once the vehicle confirms the write, either
    /// with a bare acknowledgement or by echoing the new value.
    ///
    /// # Errors
    ///
    /// - [`CrtpError::ReadOnly`] if the parameter is flagged read-only
    /// - [`CrtpError::TypeMismatch`] if `T` does not match the parameter type
    /// - [`CrtpError::Protocol`] if the reply does not confirm the write
    pub fn set_value<L: Link, T: TocValue>(
        &mut self,
        radio: &mut Transceiver<L>,
        full_name: &str,
        value: T,
    ) -> Result<()> {
        if !self.is_parameters() {
            return Err(CrtpError::Protocol(format!(
                "Cannot write {}: port {} is not the parameter port",
                full_name, self.port
            )));
        }

        let element = self.element(full_name)?;
        if element.is_read_only() {
            return Err(CrtpError::ReadOnly(full_name.to_string()));
        }
        if element.kind() != Some(T::KIND) {
            return Err(type_mismatch::<T>(element));
        }

        let id = element.id;
        let bytes = value.encode_le();
        let reply = radio
            .request(&param_write(id, &bytes), CRTP_PORT_PARAM, CRTP_CHANNEL_WRITE)
            .ok_or(CrtpError::LinkLost)?;

        let stored = match reply.payload() {
            [PARAM_ACK] => bytes,
            [reply_id, echoed @ ..] if *reply_id == id && !echoed.is_empty() => T::KIND
                .decode_wire(echoed)
                .ok_or_else(|| CrtpError::Decode(format!("Short write echo for {}", full_name)))?,
            other => {
                return Err(CrtpError::Protocol(format!(
                    "Write of {} not confirmed: {:02X?}",
                    full_name, other
                )))
            }
        };

        debug!("Set {} = {:02X?}", full_name, stored);
        if let Some(element) = self.elements.iter_mut().find(|e| e.id == id) {
            element.store(stored);
        }
        Ok(())
    }

    /// Pull the current value of a parameter from the vehicle
    pub fn request_value<L: Link>(&mut self, radio: &mut Transceiver<L>, full_name: &str) -> Result<()> {
        if !self.is_parameters() {
            return Err(CrtpError::Protocol(format!(
                "Cannot read {}: log variables are only streamed",
                full_name
            )));
        }

        let id = self.element(full_name)?.id;
        self.pull_parameter(radio, id)
    }

    fn pull_parameter<L: Link>(&mut self, radio: &mut Transceiver<L>, id: u8) -> Result<()> {
        let reply = radio
            .request(&param_read(id), CRTP_PORT_PARAM, CRTP_CHANNEL_READ)
            .ok_or(CrtpError::LinkLost)?;

        if let Err(e) = self.apply_parameter(reply.payload()) {
            warn!("Ignoring value reply for parameter {}: {}", id, e);
        }
        Ok(())
    }

    /// Store a `[id, value...]` parameter reply
    fn apply_parameter(&mut self, payload: &[u8]) -> Result<()> {
        let (&id, value) = payload
            .split_first()
            .ok_or_else(|| CrtpError::Decode("Empty parameter reply".to_string()))?;

        let element = self
            .elements
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| CrtpError::UnknownElement(format!("parameter id {}", id)))?;

        let kind = element.kind().ok_or_else(|| {
            CrtpError::Protocol(format!("{} has unknown type 0x{:02X}", element.full_name(), element.type_tag))
        })?;
        let raw = kind.decode_wire(value).ok_or_else(|| {
            CrtpError::Decode(format!("Short value for {}: {:02X?}", element.full_name(), value))
        })?;

        element.store(raw);
        Ok(())
    }

    /// Create a logging block on the vehicle and start its sampling
    ///
    /// A block already registered under `name` is removed first. The new
    /// block gets the smallest id not in use; any stale block the vehicle
    /// still holds under that id is deleted before creation.
    ///
    /// # Returns
    ///
    /// The block id
    ///
    /// # Errors
    ///
    /// Returns error if the frequency is not positive, no id is free, or the
    /// vehicle rejects creation or start.
    pub fn register_logging_block<L: Link>(
        &mut self,
        radio: &mut Transceiver<L>,
        name: &str,
        frequency: f64,
    ) -> Result<u8> {
        let period = period_for_frequency(frequency)?;

        if self.is_logging(name) {
            self.unregister_logging_block(radio, name)?;
        }

        let id = self.next_free_block_id()?;

        if let Err(e) = self.log_control(radio, log_delete_block(id), LOG_CMD_DELETE_BLOCK, id) {
            trace!("No stale block {} on vehicle: {}", id, e);
        }
        self.log_control(radio, log_create_block(id, period), LOG_CMD_CREATE_BLOCK, id)?;
        self.log_control(radio, log_start_block(id, period), LOG_CMD_START_BLOCK, id)?;

        info!("Logging block '{}' registered as {} at {} Hz", name, id, frequency);
        self.blocks.push(LoggingBlock::new(name, id, frequency, period));
        Ok(id)
    }

    fn next_free_block_id(&self) -> Result<u8> {
        (0..=u8::MAX)
            .find(|id| !self.blocks.iter().any(|b| b.id == *id))
            .ok_or_else(|| CrtpError::Protocol("No free logging block id".to_string()))
    }

    /// Add a variable to a registered block
    ///
    /// Members are sampled in the order they are added.
    pub fn start_logging<L: Link>(
        &mut self,
        radio: &mut Transceiver<L>,
        element_name: &str,
        block_name: &str,
    ) -> Result<()> {
        let element = self.element(element_name)?;
        if element.kind().is_none() {
            return Err(CrtpError::Protocol(format!(
                "{} has type 0x{:02X} with no known width",
                element_name, element.type_tag
            )));
        }
        let (element_id, type_tag) = (element.id, element.type_tag);

        let block_id = self
            .logging_block(block_name)
            .ok_or_else(|| CrtpError::UnknownBlock(block_name.to_string()))?
            .id;

        self.log_control(
            radio,
            log_append_variable(block_id, type_tag, element_id),
            LOG_CMD_APPEND_VARIABLE,
            block_id,
        )?;

        if let Some(block) = self.blocks.iter_mut().find(|b| b.id == block_id) {
            block.members.push(element_id);
        }
        debug!("Logging {} in block '{}'", element_name, block_name);
        Ok(())
    }

    pub fn is_logging(&self, block_name: &str) -> bool {
        self.logging_block(block_name).is_some()
    }

    pub fn logging_block(&self, block_name: &str) -> Option<&LoggingBlock> {
        self.blocks.iter().find(|b| b.name == block_name)
    }

    pub fn logging_blocks(&self) -> &[LoggingBlock] {
        &self.blocks
    }

    /// Delete a block by name; unknown names are a no-op
    pub fn unregister_logging_block<L: Link>(&mut self, radio: &mut Transceiver<L>, name: &str) -> Result<()> {
        match self.logging_block(name) {
            Some(block) => {
                let id = block.id;
                self.unregister_logging_block_id(radio, id)
            }
            None => Ok(()),
        }
    }

    /// Delete block `id` on the vehicle and forget it locally
    ///
    /// Succeeds once the vehicle answers, even if it did not know the block.
    pub fn unregister_logging_block_id<L: Link>(&mut self, radio: &mut Transceiver<L>, id: u8) -> Result<()> {
        match self.log_control(radio, log_delete_block(id), LOG_CMD_DELETE_BLOCK, id) {
            Ok(()) => {}
            Err(CrtpError::LinkLost) => return Err(CrtpError::LinkLost),
            Err(e) => debug!("Vehicle did not hold block {}: {}", id, e),
        }

        self.blocks.retain(|b| b.id != id);
        info!("Logging block {} unregistered", id);
        Ok(())
    }

    /// Send a logging control command and check its status reply
    ///
    /// Late replies to other commands are skipped; re-sends from the
    /// transceiver can deliver them after the one being waited for.
    fn log_control<L: Link>(
        &self,
        radio: &mut Transceiver<L>,
        packet: Packet,
        command: u8,
        block_id: u8,
    ) -> Result<()> {
        loop {
            let reply = radio
                .request(&packet, self.port, CRTP_CHANNEL_WRITE)
                .ok_or(CrtpError::LinkLost)?;

            match reply.payload() {
                [cmd, id, ..] if *cmd == command && *id == block_id => {
                    return decode_log_control_reply(reply.payload(), command, block_id)
                }
                other => trace!("Skipping stale logging control reply {:02X?}", other),
            }
        }
    }

    /// Apply queued packets for this namespace
    ///
    /// Each log sample is decoded completely before any value is stored; a
    /// sample for an unknown block, with an unknown member width, or shorter
    /// than its block layout is skipped on its own and the rest of the batch
    /// still applies.
    pub fn process_incoming<I>(&mut self, packets: I) -> ProcessSummary
    where
        I: IntoIterator<Item = Packet>,
    {
        let mut summary = ProcessSummary::default();

        for packet in packets {
            if packet.port() != self.port {
                continue;
            }

            let result = match (self.port, packet.channel()) {
                (_, CRTP_CHANNEL_TOC) => continue,
                (CRTP_PORT_PARAM, CRTP_CHANNEL_READ) => self.apply_parameter(packet.payload()),
                (CRTP_PORT_PARAM, CRTP_CHANNEL_WRITE) if packet.payload().len() > 1 => {
                    self.apply_parameter(packet.payload())
                }
                (CRTP_PORT_LOG, CRTP_CHANNEL_READ) => self.apply_sample(packet.payload()),
                _ => {
                    trace!("Ignoring {:?}", packet);
                    continue;
                }
            };

            match result {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    warn!("Skipping packet on port {}: {}", self.port, e);
                    summary.skipped += 1;
                }
            }
        }

        summary
    }

    fn apply_sample(&mut self, payload: &[u8]) -> Result<()> {
        let (header, values) = decode_log_sample(payload)?;

        let block = self
            .blocks
            .iter()
            .find(|b| b.id == header.block_id)
            .ok_or_else(|| CrtpError::UnknownBlock(format!("id {}", header.block_id)))?;

        let decoded = block.decode_sample(values, &self.elements)?;

        for (id, raw) in decoded {
            if let Some(element) = self.elements.iter_mut().find(|e| e.id == id) {
                element.store(raw);
            }
        }
        if let Some(block) = self.blocks.iter_mut().find(|b| b.id == header.block_id) {
            block.last_timestamp_ms = Some(header.timestamp_ms);
        }
        Ok(())
    }
}

fn type_mismatch<T: TocValue>(element: &TocElement) -> CrtpError {
    CrtpError::TypeMismatch {
        name: element.full_name(),
        expected: T::KIND.name(),
        actual: element
            .kind()
            .map(|k| k.name().to_string())
            .unwrap_or_else(|| format!("type 0x{:02X}", element.type_tag)),
    }
}
