//! Shared structs passed between the control loop, HTTP handlers, and tests.

use serde::{Deserialize, Serialize};

/// Read-only snapshot of the control loop, served at `GET /status`.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ControlStatus {
    pub running: bool,
    /// Curvature-derived steering angle from the most recent detection.
    pub last_steering_angle: Option<f64>,
    pub last_servo_angle: Option<i32>,
    pub command_count: u64,
    pub error_count: u64,
}

/// Counters and last-values mutated only by the control loop under its lock.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControlStats {
    pub last_steering_angle: Option<f64>,
    pub last_servo_angle: Option<i32>,
    pub command_count: u64,
    pub error_count: u64,
}

/// Partial PID gain update; `None` keeps the current value. Applied
/// field-by-field under one lock, always followed by a reset.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PidUpdate {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
}
