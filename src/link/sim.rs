//! In-memory vehicle answering CRTP requests, for tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Link, LinkError};
use crate::crtp::decoder::decode;
use crate::crtp::encoder::encode;
use crate::crtp::protocol::*;
use crate::crtp::Frame;

/// Status the vehicle firmware reports for a missing block or variable
const ENOENT: u8 = 2;

/// Status the vehicle firmware reports for an already existing block
const EEXIST: u8 = 17;

/// One variable advertised in a simulated TOC
#[derive(Debug, Clone)]
pub struct SimVariable {
    pub id: u8,
    pub type_tag: u8,
    pub group: String,
    pub name: String,
    pub value: Vec<u8>,
}

/// Device-side logging block
#[derive(Debug, Clone, Default)]
pub struct SimBlock {
    pub period: u8,
    pub members: Vec<u8>,
    pub started: bool,
}

#[derive(Debug, Default)]
pub struct SimState {
    pub params: Vec<SimVariable>,
    pub logs: Vec<SimVariable>,
    pub blocks: BTreeMap<u8, SimBlock>,
    /// Frames waiting to ride on the next acknowledgements
    pub pending: VecDeque<Vec<u8>>,
    /// Every frame the host wrote
    pub written: Vec<Vec<u8>>,
    /// Number of upcoming replies to lose
    pub drop_replies: usize,
    /// Replies to a TOC item request are corrupted (missing terminators)
    pub corrupt_items: Vec<u8>,
    /// TOC info replies are truncated
    pub bad_info: bool,
    /// Vehicle switched off / out of range: no acknowledgements at all
    pub silent: bool,
    /// Dongle unplugged
    pub unplugged: bool,
}

/// Scripted vehicle behind a perfect radio
///
/// Clones share state, so a test can keep one handle while the transceiver
/// owns the other.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCopter {
    pub state: Arc<Mutex<SimState>>,
}

impl SimulatedCopter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vehicle advertising the variables the connection logs by default
    pub fn with_standard_toc() -> Self {
        let sim = Self::new();
        sim.add_param(0x07, "stabilizer", "roll", &0.0f32.to_le_bytes());
        sim.add_param(0x41, "firmware", "revision", &[3]);
        sim.add_param(0x02, "ring", "effect", &6u16.to_le_bytes());

        for (group, name, type_tag) in [
            ("stabilizer", "roll", 0x07),
            ("stabilizer", "pitch", 0x07),
            ("stabilizer", "yaw", 0x07),
            ("stabilizer", "thrust", 0x02),
            ("gyro", "x", 0x07),
            ("gyro", "y", 0x07),
            ("gyro", "z", 0x07),
            ("acc", "x", 0x07),
            ("acc", "y", 0x07),
            ("acc", "z", 0x07),
            ("acc", "zw", 0x07),
            ("pm", "vbat", 0x07),
            ("pm", "state", 0x04),
            ("mag", "x", 0x07),
            ("mag", "y", 0x07),
            ("mag", "z", 0x07),
            ("baro", "asl", 0x07),
            ("baro", "aslRaw", 0x07),
            ("baro", "aslLong", 0x07),
            ("baro", "temp", 0x07),
            ("baro", "pressure", 0x07),
        ] {
            sim.add_log(type_tag, group, name);
        }

        sim
    }

    pub fn add_param(&self, type_tag: u8, group: &str, name: &str, value: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let id = state.params.len() as u8;
        state.params.push(SimVariable {
            id,
            type_tag,
            group: group.to_string(),
            name: name.to_string(),
            value: value.to_vec(),
        });
    }

    pub fn add_log(&self, type_tag: u8, group: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.logs.len() as u8;
        state.logs.push(SimVariable {
            id,
            type_tag,
            group: group.to_string(),
            name: name.to_string(),
            value: vec![0; value_width(type_tag)],
        });
    }

    /// Set the current value of a log variable by full name
    pub fn set_log_value(&self, full_name: &str, value: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(var) = state
            .logs
            .iter_mut()
            .find(|v| format!("{}.{}", v.group, v.name) == full_name)
        {
            var.value = value.to_vec();
        }
    }

    /// Queue one sample for every started block
    pub fn emit_samples(&self, timestamp_ms: u32) {
        let mut state = self.state.lock().unwrap();
        let mut frames = Vec::new();

        for (&block_id, block) in state.blocks.iter().filter(|(_, b)| b.started) {
            let mut payload = vec![block_id];
            payload.extend_from_slice(&timestamp_ms.to_le_bytes()[..3]);
            for member in &block.members {
                if let Some(var) = state.logs.iter().find(|v| v.id == *member) {
                    payload.extend_from_slice(&var.value);
                }
            }
            frames.push(encode(CRTP_PORT_LOG, CRTP_CHANNEL_READ, &payload));
        }

        state.pending.extend(frames);
    }

    /// Queue an arbitrary frame to be piggy-backed on the next acknowledgement
    pub fn push_frame(&self, port: u8, channel: u8, payload: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back(encode(port, channel, payload));
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().unwrap().silent = silent;
    }

    pub fn unplug(&self) {
        self.state.lock().unwrap().unplugged = true;
    }

    pub fn drop_replies(&self, count: usize) {
        self.state.lock().unwrap().drop_replies = count;
    }

    pub fn block(&self, id: u8) -> Option<SimBlock> {
        self.state.lock().unwrap().blocks.get(&id).cloned()
    }
}

fn value_width(type_tag: u8) -> usize {
    match type_tag & 0x0F {
        1 | 4 => 1,
        2 | 5 | 8 => 2,
        _ => 4,
    }
}

impl SimState {
    fn handle(&mut self, frame: &[u8]) {
        let packet = match decode(frame) {
            Ok(Frame::Packet(packet)) => packet,
            _ => return,
        };
        let payload = packet.payload().to_vec();

        let reply = match (packet.port(), packet.channel()) {
            (CRTP_PORT_PARAM, CRTP_CHANNEL_TOC) | (CRTP_PORT_LOG, CRTP_CHANNEL_TOC) => {
                self.handle_toc(packet.port(), &payload)
            }
            (CRTP_PORT_PARAM, CRTP_CHANNEL_READ) => {
                let id = payload.first().copied().unwrap_or(0);
                self.params.iter().find(|p| p.id == id).map(|p| {
                    let mut reply = vec![id];
                    reply.extend_from_slice(&p.value);
                    reply
                })
            }
            (CRTP_PORT_PARAM, CRTP_CHANNEL_WRITE) => {
                let id = payload.first().copied().unwrap_or(0);
                match self.params.iter_mut().find(|p| p.id == id) {
                    Some(p) => {
                        p.value = payload.get(1..).unwrap_or_default().to_vec();
                        Some(payload.clone())
                    }
                    None => None,
                }
            }
            (CRTP_PORT_LOG, CRTP_CHANNEL_WRITE) => self.handle_log_control(&payload),
            _ => None,
        };

        if let Some(reply) = reply {
            self.pending
                .push_back(encode(packet.port(), packet.channel(), &reply));
        }
    }

    fn handle_toc(&mut self, port: u8, payload: &[u8]) -> Option<Vec<u8>> {
        let vars = if port == CRTP_PORT_PARAM { &self.params } else { &self.logs };

        match payload {
            [TOC_CMD_GET_INFO, ..] if self.bad_info => Some(vec![TOC_CMD_GET_INFO]),
            [TOC_CMD_GET_INFO, ..] => Some(vec![TOC_CMD_GET_INFO, vars.len() as u8, 0xDE, 0xAD]),
            [TOC_CMD_GET_ITEM, rest @ ..] => {
                let index = rest.first().copied().unwrap_or(0);
                let var = vars.get(index as usize)?;
                let mut reply = vec![TOC_CMD_GET_ITEM, var.id, var.type_tag];
                reply.extend_from_slice(var.group.as_bytes());
                reply.push(0);
                reply.extend_from_slice(var.name.as_bytes());
                if !self.corrupt_items.contains(&index) {
                    reply.push(0);
                }
                Some(reply)
            }
            _ => None,
        }
    }

    fn handle_log_control(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let (cmd, block_id) = (*payload.first()?, *payload.get(1)?);

        let status = match cmd {
            LOG_CMD_CREATE_BLOCK => {
                if self.blocks.contains_key(&block_id) {
                    EEXIST
                } else {
                    self.blocks.insert(
                        block_id,
                        SimBlock {
                            period: payload.get(2).copied().unwrap_or(0),
                            ..SimBlock::default()
                        },
                    );
                    LOG_STATUS_OK
                }
            }
            LOG_CMD_APPEND_VARIABLE => {
                let element = payload.get(3).copied().unwrap_or(0xFF);
                let known = self.logs.iter().any(|v| v.id == element);
                match self.blocks.get_mut(&block_id) {
                    Some(block) if known => {
                        block.members.push(element);
                        LOG_STATUS_OK
                    }
                    _ => ENOENT,
                }
            }
            LOG_CMD_DELETE_BLOCK => match self.blocks.remove(&block_id) {
                Some(_) => LOG_STATUS_OK,
                None => ENOENT,
            },
            LOG_CMD_START_BLOCK => match self.blocks.get_mut(&block_id) {
                Some(block) => {
                    block.started = true;
                    block.period = payload.get(2).copied().unwrap_or(block.period);
                    LOG_STATUS_OK
                }
                None => ENOENT,
            },
            _ => return None,
        };

        Some(vec![cmd, block_id, status])
    }
}

impl Link for SimulatedCopter {
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        if state.unplugged {
            return Err(LinkError::Disconnected);
        }

        state.written.push(data.to_vec());
        if !state.silent {
            state.handle(data);
        }
        Ok(())
    }

    fn read(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let mut state = self.state.lock().unwrap();
        if state.unplugged {
            return Err(LinkError::Disconnected);
        }
        if state.silent {
            return Ok(vec![0x00]);
        }

        let mut reply = vec![RADIO_STATUS_ACK];
        if state.drop_replies > 0 && !state.pending.is_empty() {
            state.drop_replies -= 1;
            state.pending.pop_front();
        } else if let Some(frame) = state.pending.pop_front() {
            reply.extend_from_slice(&frame);
        }
        Ok(reply)
    }

    fn is_present(&self) -> bool {
        !self.state.lock().unwrap().unplugged
    }
}
