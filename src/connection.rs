//! # Connection Module
//!
//! Bring-up state machine for one vehicle.
//!
//! [`Crazyflie::cycle`] is the only driver: every call performs the work of
//! the current stage and moves on once that stage succeeded. Bring-up reads
//! the parameter TOC, then the log TOC, registers the standard logging blocks
//! and captures measurement baselines before settling in
//! [`ConnectionState::Normal`], where inbox traffic is applied and setpoints
//! or keep-alive pings are sent.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::crtp::encoder::setpoint;
use crate::crtp::protocol::{CRTP_PORT_LOG, CRTP_PORT_PARAM};
use crate::error::{CrtpError, Result};
use crate::link::Link;
use crate::toc::{Toc, TocValue};
use crate::transceiver::Transceiver;

/// Sampling frequency of the standard logging blocks
pub const LOG_BLOCK_FREQUENCY_HZ: f64 = 1000.0;

/// Standard logging blocks and their members, in sample order
pub const LOGGING_BLOCKS: &[(&str, &[&str])] = &[
    ("stabilizer", &["stabilizer.roll", "stabilizer.pitch", "stabilizer.yaw", "stabilizer.thrust"]),
    ("gyroscope", &["gyro.x", "gyro.y", "gyro.z"]),
    ("accelerometer", &["acc.x", "acc.y", "acc.z", "acc.zw"]),
    ("battery", &["pm.vbat", "pm.state"]),
    ("magnetometer", &["mag.x", "mag.y", "mag.z"]),
    ("barometer", &["baro.asl", "baro.aslRaw", "baro.aslLong", "baro.temp", "baro.pressure"]),
];

/// Bring-up stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Init,
    ReadParamToc,
    ReadLogToc,
    StartLogging,
    ZeroMeasurements,
    Normal,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ReadParamToc => "read parameter TOC",
            Self::ReadLogToc => "read log TOC",
            Self::StartLogging => "start logging",
            Self::ZeroMeasurements => "zero measurements",
            Self::Normal => "normal",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the vehicle for telemetry records
///
/// Fields are `None` until the corresponding log variable has been received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub state: ConnectionState,
    pub in_range: bool,
    pub ack_miss_count: u32,
    pub roll: Option<f32>,
    pub pitch: Option<f32>,
    pub yaw: Option<f32>,
    pub thrust: Option<u16>,
    pub battery_voltage: Option<f32>,
    pub battery_state: Option<i8>,
    pub gyro: Option<[f32; 3]>,
    pub acc: Option<[f32; 3]>,
    pub acc_zw: Option<f32>,
    pub mag: Option<[f32; 3]>,
    pub asl: Option<f32>,
    pub relative_altitude: Option<f32>,
    pub temperature: Option<f32>,
    pub pressure: Option<f32>,
}

/// Connection to one vehicle over a borrowed transceiver
pub struct Crazyflie<'r, L: Link> {
    radio: &'r mut Transceiver<L>,
    parameters: Toc,
    logs: Toc,
    state: ConnectionState,

    roll: f32,
    pitch: f32,
    yaw: f32,
    thrust: u16,
    send_setpoints: bool,
    setpoint_interval: Duration,
    last_setpoint: Option<Instant>,

    ack_miss_count: u32,
    ack_miss_tolerance: u32,

    baseline_asl: Option<f32>,
}

impl<L: Link> fmt::Debug for Crazyflie<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crazyflie")
            .field("state", &self.state)
            .field("ack_miss_count", &self.ack_miss_count)
            .field("send_setpoints", &self.send_setpoints)
            .finish_non_exhaustive()
    }
}

impl<'r, L: Link> Crazyflie<'r, L> {
    pub fn new(radio: &'r mut Transceiver<L>, config: &ConnectionConfig) -> Self {
        Self {
            radio,
            parameters: Toc::new(CRTP_PORT_PARAM),
            logs: Toc::new(CRTP_PORT_LOG),
            state: ConnectionState::Init,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            thrust: config.thrust,
            send_setpoints: config.send_setpoints,
            setpoint_interval: Duration::from_millis(config.setpoint_interval_ms),
            last_setpoint: None,
            ack_miss_count: 0,
            ack_miss_tolerance: config.ack_miss_tolerance,
            baseline_asl: None,
        }
    }

    /// Advance the connection by one step
    ///
    /// May block while the transceiver waits for replies during bring-up.
    ///
    /// # Returns
    ///
    /// `false` once the link is gone. The connection cannot recover from
    /// that; drop it along with its transceiver and open a new link.
    pub fn cycle(&mut self) -> bool {
        let exchanges = !matches!(
            self.state,
            ConnectionState::Init | ConnectionState::ZeroMeasurements
        );

        let next = match self.state {
            ConnectionState::Init => Some(ConnectionState::ReadParamToc),
            ConnectionState::ReadParamToc => {
                read_toc(self.radio, &mut self.parameters).then_some(ConnectionState::ReadLogToc)
            }
            ConnectionState::ReadLogToc => {
                read_toc(self.radio, &mut self.logs).then_some(ConnectionState::StartLogging)
            }
            ConnectionState::StartLogging => {
                self.start_standard_logging();
                Some(ConnectionState::ZeroMeasurements)
            }
            ConnectionState::ZeroMeasurements => {
                self.process_inboxes();
                self.capture_baseline();
                Some(ConnectionState::Normal)
            }
            ConnectionState::Normal => {
                self.process_inboxes();
                if self.baseline_asl.is_none() {
                    self.capture_baseline();
                }
                self.send_setpoint_or_ping();
                None
            }
        };

        if let Some(next) = next {
            info!("Connection: {} -> {}", self.state, next);
            self.state = next;
        }

        if exchanges {
            self.update_ack_miss_count();
        }
        self.radio.is_link_present()
    }

    fn start_standard_logging(&mut self) {
        for (block, members) in LOGGING_BLOCKS {
            if let Err(e) = self.enable_logging_block(block, members) {
                warn!("Logging block '{}' not enabled: {}", block, e);
            }
        }
    }

    fn enable_logging_block(&mut self, block: &str, members: &[&str]) -> Result<()> {
        self.logs
            .register_logging_block(self.radio, block, LOG_BLOCK_FREQUENCY_HZ)?;
        for member in members {
            if let Err(e) = self.logs.start_logging(self.radio, member, block) {
                warn!("Not logging {} in '{}': {}", member, block, e);
            }
        }
        Ok(())
    }

    /// Register one of the standard [`LOGGING_BLOCKS`] and add its members
    ///
    /// Enabling a block that is already logging registers it afresh.
    ///
    /// # Errors
    ///
    /// Returns [`CrtpError::UnknownBlock`] for names outside
    /// [`LOGGING_BLOCKS`], or the registration error.
    pub fn enable_logging(&mut self, block: &str) -> Result<()> {
        let members = standard_block_members(block)?;
        self.enable_logging_block(block, members)
    }

    /// Unregister one of the standard [`LOGGING_BLOCKS`]
    ///
    /// Disabling a block that is not logging succeeds.
    pub fn disable_logging(&mut self, block: &str) -> Result<()> {
        standard_block_members(block)?;
        self.logs.unregister_logging_block(self.radio, block)
    }

    pub fn is_logging(&self, block: &str) -> bool {
        self.logs.is_logging(block)
    }

    /// Unregister every logging block on the vehicle
    pub fn stop_logging(&mut self) -> Result<()> {
        let names: Vec<String> = self
            .logs
            .logging_blocks()
            .iter()
            .map(|b| b.name.clone())
            .collect();
        for name in names {
            self.logs.unregister_logging_block(self.radio, &name)?;
        }
        Ok(())
    }

    fn process_inboxes(&mut self) {
        let params = self.radio.drain_inbox(CRTP_PORT_PARAM);
        let logs = self.radio.drain_inbox(CRTP_PORT_LOG);

        let p = self.parameters.process_incoming(params);
        let l = self.logs.process_incoming(logs);
        if p.skipped + l.skipped > 0 {
            debug!("Skipped {} parameter and {} log packets", p.skipped, l.skipped);
        }
    }

    fn capture_baseline(&mut self) {
        if let Ok(asl) = self.asl() {
            info!("Barometric baseline: {:.2} m", asl);
            self.baseline_asl = Some(asl);
        }
    }

    fn send_setpoint_or_ping(&mut self) {
        let due = self
            .last_setpoint
            .map_or(true, |sent| sent.elapsed() >= self.setpoint_interval);

        if self.send_setpoints && due {
            let packet = setpoint(self.roll, self.pitch, self.yaw, self.thrust);
            self.radio.send(&packet);
            self.last_setpoint = Some(Instant::now());
        } else {
            self.radio.ping();
        }
    }

    fn update_ack_miss_count(&mut self) {
        if self.radio.ack_received() {
            self.ack_miss_count = 0;
        } else {
            self.ack_miss_count = self.ack_miss_count.saturating_add(1);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Bring-up finished
    pub fn is_initialized(&self) -> bool {
        self.state == ConnectionState::Normal
    }

    /// Consecutive cycles without an acknowledgement
    pub fn ack_miss_count(&self) -> u32 {
        self.ack_miss_count
    }

    pub fn in_range(&self) -> bool {
        self.ack_miss_count < self.ack_miss_tolerance
    }

    pub fn parameters(&self) -> &Toc {
        &self.parameters
    }

    pub fn logs(&self) -> &Toc {
        &self.logs
    }

    pub fn set_roll(&mut self, roll: f32) {
        self.roll = roll;
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
    }

    pub fn set_yaw(&mut self, yaw: f32) {
        self.yaw = yaw;
    }

    pub fn set_thrust(&mut self, thrust: u16) {
        self.thrust = thrust;
    }

    pub fn set_send_setpoints(&mut self, send_setpoints: bool) {
        self.send_setpoints = send_setpoints;
    }

    pub fn sends_setpoints(&self) -> bool {
        self.send_setpoints
    }

    pub fn log_value<T: TocValue>(&self, name: &str) -> Result<T> {
        self.logs.get_value(name)
    }

    pub fn parameter_value<T: TocValue>(&self, name: &str) -> Result<T> {
        self.parameters.get_value(name)
    }

    pub fn set_parameter_value<T: TocValue>(&mut self, name: &str, value: T) -> Result<()> {
        self.parameters.set_value(self.radio, name, value)
    }

    pub fn request_parameter_value(&mut self, name: &str) -> Result<()> {
        self.parameters.request_value(self.radio, name)
    }

    // Measured attitude and thrust, as logged by the vehicle

    pub fn roll(&self) -> Result<f32> {
        self.log_value("stabilizer.roll")
    }

    pub fn pitch(&self) -> Result<f32> {
        self.log_value("stabilizer.pitch")
    }

    pub fn yaw(&self) -> Result<f32> {
        self.log_value("stabilizer.yaw")
    }

    pub fn thrust(&self) -> Result<u16> {
        self.log_value("stabilizer.thrust")
    }

    pub fn battery_level(&self) -> Result<f32> {
        self.log_value("pm.vbat")
    }

    pub fn battery_state(&self) -> Result<i8> {
        self.log_value("pm.state")
    }

    pub fn acc_x(&self) -> Result<f32> {
        self.log_value("acc.x")
    }

    pub fn acc_y(&self) -> Result<f32> {
        self.log_value("acc.y")
    }

    pub fn acc_z(&self) -> Result<f32> {
        self.log_value("acc.z")
    }

    pub fn acc_zw(&self) -> Result<f32> {
        self.log_value("acc.zw")
    }

    pub fn gyro_x(&self) -> Result<f32> {
        self.log_value("gyro.x")
    }

    pub fn gyro_y(&self) -> Result<f32> {
        self.log_value("gyro.y")
    }

    pub fn gyro_z(&self) -> Result<f32> {
        self.log_value("gyro.z")
    }

    pub fn mag_x(&self) -> Result<f32> {
        self.log_value("mag.x")
    }

    pub fn mag_y(&self) -> Result<f32> {
        self.log_value("mag.y")
    }

    pub fn mag_z(&self) -> Result<f32> {
        self.log_value("mag.z")
    }

    pub fn asl(&self) -> Result<f32> {
        self.log_value("baro.asl")
    }

    pub fn asl_raw(&self) -> Result<f32> {
        self.log_value("baro.aslRaw")
    }

    pub fn asl_long(&self) -> Result<f32> {
        self.log_value("baro.aslLong")
    }

    pub fn temperature(&self) -> Result<f32> {
        self.log_value("baro.temp")
    }

    pub fn pressure(&self) -> Result<f32> {
        self.log_value("baro.pressure")
    }

    /// Altitude above the point where bring-up finished
    pub fn relative_altitude(&self) -> Option<f32> {
        Some(self.asl().ok()? - self.baseline_asl?)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let triple = |x: Result<f32>, y: Result<f32>, z: Result<f32>| Some([x.ok()?, y.ok()?, z.ok()?]);

        TelemetrySnapshot {
            state: self.state,
            in_range: self.in_range(),
            ack_miss_count: self.ack_miss_count,
            roll: self.roll().ok(),
            pitch: self.pitch().ok(),
            yaw: self.yaw().ok(),
            thrust: self.thrust().ok(),
            battery_voltage: self.battery_level().ok(),
            battery_state: self.battery_state().ok(),
            gyro: triple(self.gyro_x(), self.gyro_y(), self.gyro_z()),
            acc: triple(self.acc_x(), self.acc_y(), self.acc_z()),
            acc_zw: self.acc_zw().ok(),
            mag: triple(self.mag_x(), self.mag_y(), self.mag_z()),
            asl: self.asl().ok(),
            relative_altitude: self.relative_altitude(),
            temperature: self.temperature().ok(),
            pressure: self.pressure().ok(),
        }
    }
}

/// Read one TOC completely; failures are retried on the next cycle
fn standard_block_members(block: &str) -> Result<&'static [&'static str]> {
    LOGGING_BLOCKS
        .iter()
        .find(|(name, _)| *name == block)
        .map(|(_, members)| *members)
        .ok_or_else(|| CrtpError::UnknownBlock(block.to_string()))
}

fn read_toc<L: Link>(radio: &mut Transceiver<L>, toc: &mut Toc) -> bool {
    let result = toc
        .request_metadata(radio)
        .and_then(|()| toc.request_all_items(radio));

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Reading TOC on port {} failed: {}", toc.port(), e);
            false
        }
    }
}
