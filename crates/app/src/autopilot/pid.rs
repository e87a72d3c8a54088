//! PID controller owned by the lane detector and live-tunable from the
//! orchestrator.

use serde::Serialize;

use crate::autopilot::data::PidUpdate;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Error deadband below which the vehicle is considered straight.
    pub tolerance: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.06,
            ki: 0.002,
            kd: 0.02,
            tolerance: 40.0,
        }
    }
}

pub struct PidController {
    gains: PidGains,
    integral: f64,
    last_error: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            last_error: None,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Advance the controller by one step of `dt` seconds.
    pub fn step(&mut self, error: f64, dt: f64) -> f64 {
        let error = if error.abs() < self.gains.tolerance {
            0.0
        } else {
            error
        };
        let dt = dt.max(1e-3);

        self.integral += error * dt;
        let derivative = match self.last_error {
            Some(last) => (error - last) / dt,
            None => 0.0,
        };
        self.last_error = Some(error);

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    /// Apply a partial gain update and reset accumulated state.
    ///
    /// The reset is unconditional: retaining the integral/derivative history
    /// across a gain change produces control discontinuities. Callers hold
    /// the controller lock for the whole call, so a reader never observes new
    /// gains paired with stale state.
    pub fn apply_update(&mut self, update: PidUpdate) {
        if let Some(kp) = update.kp {
            self.gains.kp = kp;
        }
        if let Some(ki) = update.ki {
            self.gains.ki = ki;
        }
        if let Some(kd) = update.kd {
            self.gains.kd = kd;
        }
        self.reset();
    }

    /// Clear accumulated integral and derivative state.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
    }

    #[cfg(test)]
    pub(crate) fn accumulated_integral(&self) -> f64 {
        self.integral
    }
}
