//! # CRTP Client
//!
//! Keeps a connection to one quadrotor alive through a radio bridge.
//!
//! The binary opens the link, drives the connection state machine and
//! records telemetry snapshots. Whenever the link disappears the whole
//! component tree (link, transceiver, connection) is dropped and rebuilt
//! once the bridge answers again.
//!
//! # Usage
//!
//! ```bash
//! crtp-client [path/to/config.toml]
//! ```
//!
//! Expected output:
//! ```text
//! INFO crtp_client: CRTP client v0.1.0 starting...
//! INFO crtp_client::link: UDP link ready: 0.0.0.0:53211 -> 127.0.0.1:19950
//! INFO crtp_client::connection: Connection: init -> read parameter TOC
//! INFO crtp_client: Vehicle ready (62 parameters, 21 log variables)
//! ```

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crtp_client::config::Config;
use crtp_client::connection::Crazyflie;
use crtp_client::link::{Link, LinkError, UdpLink};
use crtp_client::telemetry::TelemetryRecorder;
use crtp_client::transceiver::Transceiver;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Time between status log messages
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Link wrapper that reports itself gone once shutdown is requested
///
/// The transceiver only leaves its retry loop when the link disappears, so
/// this is what lets Ctrl+C interrupt a vehicle that stopped answering.
struct Interruptible<L: Link> {
    inner: L,
    shutdown: watch::Receiver<bool>,
}

impl<L: Link> Link for Interruptible<L> {
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), LinkError> {
        self.inner.write(data)
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> std::result::Result<Vec<u8>, LinkError> {
        self.inner.read(max_len, timeout)
    }

    fn is_present(&self) -> bool {
        !*self.shutdown.borrow() && self.inner.is_present()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let (config, loaded) = if Path::new(&config_path).exists() {
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path))?;
        (config, true)
    } else {
        (Config::default(), false)
    };

    let _log_guard = init_logging(&config)?;

    info!("CRTP client v{} starting...", env!("CARGO_PKG_VERSION"));
    if loaded {
        info!("Configuration loaded from {}", config_path);
    } else {
        warn!("{} not found, using default configuration", config_path);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Press Ctrl+C to exit");
    tokio::task::spawn_blocking(move || run(config, shutdown_rx))
        .await
        .context("Connection driver panicked")??;

    info!("Shutdown complete");
    Ok(())
}

/// Console logging plus a daily rolling log file next to the telemetry
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = if config.telemetry.enabled {
        std::fs::create_dir_all(&config.telemetry.log_dir)
            .with_context(|| format!("Failed to create {}", config.telemetry.log_dir))?;
        let appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, "crtp-client.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Replug loop: connect, drive until the link is lost, repeat
fn run(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let mut recorder = if config.telemetry.enabled {
        Some(TelemetryRecorder::new(&config.telemetry)?)
    } else {
        None
    };
    let reconnect_interval = Duration::from_millis(config.link.reconnect_interval_ms);

    while !*shutdown.borrow() {
        let link = match UdpLink::connect(&config.link) {
            Ok(link) => link,
            Err(e) => {
                warn!("Cannot open link to {}: {}", config.link.address, e);
                thread::sleep(reconnect_interval);
                continue;
            }
        };

        let link = Interruptible {
            inner: link,
            shutdown: shutdown.clone(),
        };
        let mut radio = Transceiver::new(link, &config.transceiver);
        drive(&mut radio, &config, recorder.as_mut());

        if !*shutdown.borrow() {
            warn!("Link lost, reconnecting in {:?}", reconnect_interval);
            thread::sleep(reconnect_interval);
        }
    }

    if let Some(recorder) = recorder.as_mut() {
        recorder.flush()?;
    }
    Ok(())
}

/// Cycle one connection until its link is gone
fn drive<L: Link>(radio: &mut Transceiver<L>, config: &Config, mut recorder: Option<&mut TelemetryRecorder>) {
    let record_interval = Duration::from_millis(config.telemetry.log_interval_ms);
    let mut copter = Crazyflie::new(radio, &config.connection);

    let mut was_initialized = false;
    let mut was_in_range = true;
    let mut last_record: Option<Instant> = None;
    let mut last_status = Instant::now();
    let mut cycles: u64 = 0;

    while copter.cycle() {
        cycles += 1;

        if copter.is_initialized() && !was_initialized {
            info!(
                "Vehicle ready ({} parameters, {} log variables)",
                copter.parameters().elements().len(),
                copter.logs().elements().len()
            );
            was_initialized = true;
        }

        let in_range = copter.in_range();
        if in_range != was_in_range {
            if in_range {
                info!("Vehicle back in range");
            } else {
                warn!("Vehicle out of range ({} unacknowledged cycles)", copter.ack_miss_count());
            }
            was_in_range = in_range;
        }

        if was_initialized && last_record.map_or(true, |t| t.elapsed() >= record_interval) {
            if let Some(recorder) = recorder.as_deref_mut() {
                if let Err(e) = recorder.record(&copter.snapshot()) {
                    warn!("Failed to record telemetry: {}", e);
                }
            }
            last_record = Some(Instant::now());
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            info!(
                "Status: {} after {} cycles, battery {:?} V, ack misses {}",
                copter.state(),
                cycles,
                copter.battery_level().ok(),
                copter.ack_miss_count()
            );
            last_status = Instant::now();
        }
    }

    debug!("Connection ended after {} cycles", cycles);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysThere;

    impl Link for AlwaysThere {
        fn write(&mut self, _data: &[u8]) -> std::result::Result<(), LinkError> {
            Ok(())
        }

        fn read(&mut self, _max_len: usize, _timeout: Duration) -> std::result::Result<Vec<u8>, LinkError> {
            Ok(vec![0x01])
        }

        fn is_present(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_interruptible_link_disappears_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let link = Interruptible {
            inner: AlwaysThere,
            shutdown: rx,
        };
        assert!(link.is_present());

        tx.send(true).unwrap();
        assert!(!link.is_present());
    }

    #[test]
    fn test_shutdown_ends_transceiver_wait() {
        let (tx, rx) = watch::channel(false);
        let link = Interruptible {
            inner: AlwaysThere,
            shutdown: rx,
        };
        let mut radio = Transceiver::new(link, &Config::default().transceiver);
        tx.send(true).unwrap();

        let packet = crtp_client::crtp::encoder::param_read(0);
        assert!(radio.request(&packet, 2, 2).is_none());
    }

    #[test]
    fn test_default_config_path() {
        assert!(DEFAULT_CONFIG_PATH.ends_with(".toml"));
    }
}
