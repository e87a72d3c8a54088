//! Serial command transport.
//!
//! One command per line over a byte stream. Write failures are reported to the
//! caller as `false` and tracked as link health; the control loop treats them
//! as counted errors and keeps going.

use std::{
    io::Write,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::protocol::{Command, Mode};

/// Consecutive write failures before the link is reported unhealthy.
const LINK_UNHEALTHY_AFTER: u32 = 5;

/// Owns the byte stream to the actuator and encodes commands onto it.
pub struct CommandLink {
    writer: Mutex<Box<dyn Write + Send>>,
    consecutive_failures: AtomicU32,
}

impl CommandLink {
    /// Open a serial device at `baud`, 8N1, with a short write timeout so a
    /// wedged UART degrades to a failed send instead of a stalled loop.
    pub fn open_serial(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()
            .with_context(|| format!("opening serial device {path}"))?;
        debug!("serial link open at {path} ({baud} baud)");
        Ok(Self::from_writer(port))
    }

    /// Wrap an arbitrary writer; used by tests to capture the wire bytes.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Encode and write one command line. Returns `false` on transport
    /// failure; never panics or propagates.
    pub fn send(&self, command: Command) -> bool {
        let line = format!("{command}\n");
        let result = match self.writer.lock() {
            Ok(mut writer) => writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.flush()),
            Err(_) => {
                warn!("command link writer poisoned");
                self.record_failure();
                return false;
            }
        };
        match result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!("failed to send {command}: {err}");
                self.record_failure();
                false
            }
        }
    }

    /// Validate and send a servo steering angle (protocol range 0-180).
    /// Out-of-range values are a caller error reported synchronously, before
    /// anything touches the wire.
    pub fn send_steering(&self, servo_angle: i32) -> bool {
        match Command::set_steer(servo_angle) {
            Ok(cmd) => self.send(cmd),
            Err(err) => {
                warn!("rejected steering command: {err}");
                false
            }
        }
    }

    /// Validate and send a motor speed (0-255).
    pub fn send_speed(&self, speed: i32) -> bool {
        match Command::set_speed(speed) {
            Ok(cmd) => self.send(cmd),
            Err(err) => {
                warn!("rejected speed command: {err}");
                false
            }
        }
    }

    pub fn arm(&self) -> bool {
        self.send(Command::SysArm)
    }

    pub fn disarm(&self) -> bool {
        self.send(Command::SysDisarm)
    }

    pub fn set_mode(&self, mode: Mode) -> bool {
        self.send(Command::SysMode(mode))
    }

    pub fn brake(&self) -> bool {
        self.send(Command::BrakeNow)
    }

    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    /// Whether the link has seen fewer consecutive failures than the
    /// unhealthy threshold.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) < LINK_UNHEALTHY_AFTER
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == LINK_UNHEALTHY_AFTER {
            warn!("command link unhealthy after {failures} consecutive failures");
        }
    }
}
