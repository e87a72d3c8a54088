//! Actuator-side protocol state machine.
//!
//! This mirrors the firmware running on the microcontroller: arming gates
//! control commands, AUTO mode demands a live heartbeat, and losing the
//! control channel fails safe by zeroing the motors. The state machine takes
//! explicit timestamps so the timeout behavior is deterministic under test;
//! the same type doubles as a bench simulator for exercising the client.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::{Command, Mode, ProtocolError};

/// Silence on the link longer than this while in AUTO forces a safe stop.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(120);

/// Clients must send traffic at least this often to stay inside the window.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Servo angle the simulator centers on when actuation is zeroed.
const STEER_CENTER: i32 = 105;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disarmed,
    Armed(Mode),
    /// Safe-stop latch: motors zeroed, recoverable only by an explicit re-arm.
    Emergency,
}

/// Whether a parsed command was acted upon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// Valid command ignored because of the current arm/mode state.
    Rejected,
}

pub struct ActuatorSim {
    state: LinkState,
    speed: i32,
    steer: i32,
    last_heartbeat: Option<Instant>,
}

impl Default for ActuatorSim {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorSim {
    /// Boots DISARMED, motors zeroed. State is never persisted.
    pub fn new() -> Self {
        Self {
            state: LinkState::Disarmed,
            speed: 0,
            steer: STEER_CENTER,
            last_heartbeat: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn steer(&self) -> i32 {
        self.steer
    }

    /// Parse and apply one wire line at time `now`.
    ///
    /// Any recognized line counts as a heartbeat, matching the firmware: the
    /// timeout watches for link silence, not for a dedicated message type.
    /// The window is judged against the *previous* heartbeat before this line
    /// refreshes it: the firmware's supervisor runs continuously, so silence
    /// past the window has already latched the fault by the time a late
    /// command arrives.
    pub fn apply_line(&mut self, line: &str, now: Instant) -> Result<Disposition, ProtocolError> {
        let command = Command::parse(line)?;
        self.poll(now);
        self.last_heartbeat = Some(now);
        Ok(self.apply(command))
    }

    /// Check the heartbeat window; returns `true` if it just forced a safe
    /// stop. Call this from the bench loop the way the firmware's supervisor
    /// task polls its watchdog.
    pub fn poll(&mut self, now: Instant) -> bool {
        let LinkState::Armed(Mode::Auto) = self.state else {
            return false;
        };
        let expired = match self.last_heartbeat {
            Some(at) => now.duration_since(at) > HEARTBEAT_TIMEOUT,
            None => true,
        };
        if expired {
            debug!("heartbeat timeout; safe stop");
            self.safe_stop();
        }
        expired
    }

    fn apply(&mut self, command: Command) -> Disposition {
        match command {
            // Emergency commands are unconditional: honored in every state,
            // no arming precondition.
            Command::BrakeNow | Command::Stop => {
                self.safe_stop();
                Disposition::Accepted
            }
            Command::SysArm => {
                self.state = LinkState::Armed(Mode::Manual);
                Disposition::Accepted
            }
            Command::SysDisarm => {
                self.zero_actuation();
                self.state = LinkState::Disarmed;
                Disposition::Accepted
            }
            Command::SysMode(mode) => match self.state {
                LinkState::Armed(_) => {
                    self.state = LinkState::Armed(mode);
                    Disposition::Accepted
                }
                LinkState::Disarmed | LinkState::Emergency => Disposition::Rejected,
            },
            Command::SetSpeed(value) => {
                if self.controls_enabled() {
                    self.speed = value;
                    Disposition::Accepted
                } else {
                    Disposition::Rejected
                }
            }
            Command::SetSteer(value) => {
                if self.controls_enabled() {
                    self.steer = value;
                    Disposition::Accepted
                } else {
                    Disposition::Rejected
                }
            }
        }
    }

    // Expiry in AUTO is handled before commands are applied, so by the time
    // a control command reaches here an expired window has already latched
    // EMERGENCY.
    fn controls_enabled(&self) -> bool {
        matches!(self.state, LinkState::Armed(_))
    }

    fn safe_stop(&mut self) {
        self.zero_actuation();
        self.state = LinkState::Emergency;
    }

    fn zero_actuation(&mut self) {
        self.speed = 0;
        self.steer = STEER_CENTER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn boots_disarmed_and_ignores_control_commands() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        assert_eq!(sim.state(), LinkState::Disarmed);
        assert_eq!(
            sim.apply_line("C:SET_SPEED:128", t0).unwrap(),
            Disposition::Rejected
        );
        assert_eq!(sim.speed(), 0);
    }

    #[test]
    fn arming_defaults_to_manual_mode() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        assert_eq!(sim.state(), LinkState::Armed(Mode::Manual));
        assert_eq!(
            sim.apply_line("C:SET_STEER:70", at(t0, 10)).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(sim.steer(), 70);
    }

    #[test]
    fn mode_switch_requires_arming_first() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        assert_eq!(
            sim.apply_line("M:SYS_MODE:1", t0).unwrap(),
            Disposition::Rejected
        );
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        assert_eq!(
            sim.apply_line("M:SYS_MODE:1", at(t0, 5)).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(sim.state(), LinkState::Armed(Mode::Auto));
    }

    #[test]
    fn heartbeat_timeout_in_auto_forces_safe_stop() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        sim.apply_line("M:SYS_MODE:1", at(t0, 5)).unwrap();
        sim.apply_line("C:SET_SPEED:128", at(t0, 10)).unwrap();
        assert_eq!(sim.speed(), 128);

        // Inside the window nothing happens.
        assert!(!sim.poll(at(t0, 100)));

        // 150 ms of silence exceeds the 120 ms window.
        assert!(sim.poll(at(t0, 160)));
        assert_eq!(sim.state(), LinkState::Emergency);
        assert_eq!(sim.speed(), 0);

        // Control stays rejected until an explicit re-arm + mode.
        assert_eq!(
            sim.apply_line("C:SET_SPEED:64", at(t0, 170)).unwrap(),
            Disposition::Rejected
        );
        sim.apply_line("M:SYS_ARM", at(t0, 180)).unwrap();
        sim.apply_line("M:SYS_MODE:1", at(t0, 185)).unwrap();
        assert_eq!(
            sim.apply_line("C:SET_SPEED:64", at(t0, 190)).unwrap(),
            Disposition::Accepted
        );
    }

    #[test]
    fn late_command_after_silence_is_rejected_without_an_interleaved_poll() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        sim.apply_line("M:SYS_MODE:1", t0).unwrap();

        // 200 ms of silence with no poll() in between: the late command must
        // still find the fault latched, not refresh its own heartbeat.
        assert_eq!(
            sim.apply_line("C:SET_SPEED:128", at(t0, 200)).unwrap(),
            Disposition::Rejected
        );
        assert_eq!(sim.state(), LinkState::Emergency);
        assert_eq!(sim.speed(), 0);

        // Recovery still takes the full arm + mode sequence.
        sim.apply_line("M:SYS_ARM", at(t0, 210)).unwrap();
        sim.apply_line("M:SYS_MODE:1", at(t0, 215)).unwrap();
        assert_eq!(
            sim.apply_line("C:SET_SPEED:128", at(t0, 220)).unwrap(),
            Disposition::Accepted
        );
    }

    #[test]
    fn regular_traffic_keeps_auto_mode_alive() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        sim.apply_line("M:SYS_MODE:1", t0).unwrap();
        // 100 ms cadence against the 120 ms window, as the client loop runs.
        for i in 1..=10u64 {
            let now = at(t0, i * 100);
            assert!(!sim.poll(now));
            assert_eq!(
                sim.apply_line("C:SET_STEER:90", now).unwrap(),
                Disposition::Accepted
            );
        }
        assert_eq!(sim.state(), LinkState::Armed(Mode::Auto));
    }

    #[test]
    fn emergency_brake_is_honored_in_every_state() {
        let t0 = Instant::now();

        let mut disarmed = ActuatorSim::new();
        assert_eq!(
            disarmed.apply_line("E:BRAKE_NOW", t0).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(disarmed.state(), LinkState::Emergency);

        let mut armed = ActuatorSim::new();
        armed.apply_line("M:SYS_ARM", t0).unwrap();
        armed.apply_line("C:SET_SPEED:200", at(t0, 1)).unwrap();
        assert_eq!(
            armed.apply_line("E:STOP", at(t0, 2)).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(armed.speed(), 0);
        assert_eq!(armed.state(), LinkState::Emergency);
    }

    #[test]
    fn disarm_zeroes_actuation_from_any_state() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        sim.apply_line("C:SET_SPEED:200", at(t0, 1)).unwrap();
        sim.apply_line("M:SYS_DISARM", at(t0, 2)).unwrap();
        assert_eq!(sim.state(), LinkState::Disarmed);
        assert_eq!(sim.speed(), 0);

        // Also the recovery path out of EMERGENCY.
        sim.apply_line("E:BRAKE_NOW", at(t0, 3)).unwrap();
        sim.apply_line("M:SYS_DISARM", at(t0, 4)).unwrap();
        assert_eq!(sim.state(), LinkState::Disarmed);
    }

    #[test]
    fn malformed_lines_do_not_refresh_the_heartbeat() {
        let mut sim = ActuatorSim::new();
        let t0 = Instant::now();
        sim.apply_line("M:SYS_ARM", t0).unwrap();
        sim.apply_line("M:SYS_MODE:1", t0).unwrap();
        assert!(sim.apply_line("X:NOISE", at(t0, 100)).is_err());
        assert!(sim.poll(at(t0, 130)));
        assert_eq!(sim.state(), LinkState::Emergency);
    }
}
