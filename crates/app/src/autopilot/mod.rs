//! Onboard autopilot: camera frames in, steering commands out, live preview
//! on the side.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `controller`: The fixed-cadence control loop orchestrator.
//! - `detector`: Steering detector contract and the bundled lane detector.
//! - `pid`: PID controller shared between detector and live tuning.
//! - `converter`: Steering-angle to servo-angle mapping.
//! - `server`: Actix Web preview and status endpoints.
//! - `telemetry`: Tracing and Prometheus metrics setup.
//! - `data`: Shared structs passed between the loop and HTTP handlers.

pub use config::AutopilotConfig;

mod config;
mod controller;
mod converter;
mod data;
mod detector;
mod pid;
mod server;
pub mod telemetry;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use actuator_link::{CommandLink, Mode};
use anyhow::{Context, Result};
use tracing::{info, warn};
use video_ingest::CameraSource;

use crate::autopilot::{
    controller::AutopilotController,
    converter::AngleConverter,
    detector::LaneDetector,
    pid::PidController,
    server::spawn_preview_server,
};

/// Bring the whole system up and run until Ctrl+C.
pub fn run(config: AutopilotConfig) -> Result<()> {
    let _ = telemetry::init_metrics_recorder();

    let camera = Arc::new(CameraSource::new(
        &config.camera_uri,
        (config.width, config.height),
        config.fps,
    ));
    // The one unrecoverable failure: a camera that cannot be opened.
    camera
        .initialize()
        .with_context(|| format!("opening camera {}", config.camera_uri))?;

    let link = Arc::new(
        CommandLink::open_serial(&config.serial_port, config.baud)
            .with_context(|| format!("opening actuator link {}", config.serial_port))?,
    );

    let pid = Arc::new(Mutex::new(PidController::new(config.pid)));
    let detector = LaneDetector::new(config.threshold, pid.clone());
    let converter = AngleConverter::new(config.steer_center, config.steer_min, config.steer_max);
    let controller = Arc::new(AutopilotController::new(
        camera.clone(),
        Box::new(detector),
        pid,
        converter,
        link.clone(),
    ));

    controller.start();

    // Arm and switch to AUTO. Control commands rejected before the actuator
    // confirms arming are expected; the loop keeps sending and the 30 Hz
    // cadence doubles as the AUTO-mode heartbeat from here on.
    if !link.arm() {
        warn!("arm command failed; actuator will ignore control until re-armed");
    }
    if !link.set_mode(Mode::Auto) {
        warn!("mode command failed; actuator stays in manual");
    }

    let server = spawn_preview_server(
        camera.clone(),
        controller.clone(),
        config.jpeg_quality,
        config.http_port,
    )?;
    info!(
        "preview at http://127.0.0.1:{}/ (stream at /stream.mjpg)",
        config.http_port
    );
    if config.verbose {
        info!("running autopilot — press Ctrl+C to stop");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    controller.stop();
    // Leave the vehicle in a safe state; a failed disarm is the actuator
    // watchdog's problem within its timeout window.
    if !link.disarm() {
        warn!("disarm on shutdown failed");
    }
    server.stop();
    camera.stop();
    Ok(())
}
