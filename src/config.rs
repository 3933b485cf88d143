//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{CrtpError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub transceiver: TransceiverConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Radio link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Address of the radio bridge (host:port)
    #[serde(default = "default_link_address")]
    pub address: String,

    /// Local address to bind the link socket to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Pause between attempts to re-open a lost link
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Retry protocol configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransceiverConfig {
    /// Wait-loop iterations between re-sends of the original packet
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Sleep between wait-loop iterations
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// How long to wait for the reply to each transfer
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Connection state machine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Consecutive unacknowledged cycles before the vehicle counts as out of range
    #[serde(default = "default_ack_miss_tolerance")]
    pub ack_miss_tolerance: u32,

    /// Minimum time between two setpoints
    #[serde(default = "default_setpoint_interval_ms")]
    pub setpoint_interval_ms: u64,

    #[serde(default)]
    pub send_setpoints: bool,

    /// Initial thrust setpoint
    #[serde(default)]
    pub thrust: u16,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_link_address() -> String { "127.0.0.1:19950".to_string() }
fn default_bind_address() -> String { "0.0.0.0:0".to_string() }
fn default_write_timeout_ms() -> u64 { 1000 }
fn default_reconnect_interval_ms() -> u64 { 500 }

fn default_retries() -> u32 { 10 }
fn default_retry_interval_ms() -> u64 { 1 }
fn default_read_timeout_ms() -> u64 { 50 }

fn default_ack_miss_tolerance() -> u32 { 10 }
fn default_setpoint_interval_ms() -> u64 { 10 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: default_link_address(),
            bind_address: default_bind_address(),
            write_timeout_ms: default_write_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ack_miss_tolerance: default_ack_miss_tolerance(),
            setpoint_interval_ms: default_setpoint_interval_ms(),
            send_setpoints: false,
            thrust: 0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> CrtpError {
    CrtpError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crtp_client::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.address.is_empty() {
            return Err(invalid("link address cannot be empty"));
        }

        if self.link.bind_address.is_empty() {
            return Err(invalid("link bind_address cannot be empty"));
        }

        if self.link.write_timeout_ms == 0 || self.link.write_timeout_ms > 10000 {
            return Err(invalid("write_timeout_ms must be between 1 and 10000"));
        }

        if self.link.reconnect_interval_ms == 0 || self.link.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.transceiver.retries == 0 {
            return Err(invalid("retries must be greater than 0"));
        }

        if self.transceiver.retry_interval_ms > 1000 {
            return Err(invalid("retry_interval_ms must be between 0 and 1000"));
        }

        if self.transceiver.read_timeout_ms == 0 || self.transceiver.read_timeout_ms > 1000 {
            return Err(invalid("read_timeout_ms must be between 1 and 1000"));
        }

        if self.connection.ack_miss_tolerance == 0 {
            return Err(invalid("ack_miss_tolerance must be greater than 0"));
        }

        if self.connection.setpoint_interval_ms > 1000 {
            return Err(invalid("setpoint_interval_ms must be between 0 and 1000"));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        Ok(())
    }
}
