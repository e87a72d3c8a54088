//! End-to-end session: the client transport writes wire lines into a buffer
//! and the actuator simulator replays them, the way the bench harness drives
//! the real firmware over UART.

use std::{
    io::Write,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use actuator_link::{ActuatorSim, CommandLink, Disposition, LinkState, Mode};

#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<u8>>>);

impl Wire {
    fn drain_lines(&self) -> Vec<String> {
        let mut buf = self.0.lock().unwrap();
        let text = String::from_utf8(std::mem::take(&mut *buf)).unwrap();
        text.lines().map(str::to_string).collect()
    }
}

impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn arm_drive_brake_disarm_session() {
    let wire = Wire::default();
    let link = CommandLink::from_writer(wire.clone());
    let mut sim = ActuatorSim::new();
    let t0 = Instant::now();
    let mut now = t0;

    // Control before arming is expected to be ignored, not an error.
    assert!(link.send_speed(128));
    for line in wire.drain_lines() {
        assert_eq!(sim.apply_line(&line, now).unwrap(), Disposition::Rejected);
    }

    assert!(link.arm());
    assert!(link.set_mode(Mode::Auto));
    for line in wire.drain_lines() {
        assert_eq!(sim.apply_line(&line, now).unwrap(), Disposition::Accepted);
    }
    assert_eq!(sim.state(), LinkState::Armed(Mode::Auto));

    // Ten cycles of alternating speed/steer at 10 Hz; the traffic itself is
    // the heartbeat that keeps AUTO mode alive.
    for i in 0..10 {
        now += Duration::from_millis(100);
        assert!(!sim.poll(now));

        let speed = if i % 2 == 0 { 128 } else { 192 };
        let steer = [70, 90, 110][i % 3];
        assert!(link.send_speed(speed));
        assert!(link.send_steering(steer));
        for line in wire.drain_lines() {
            assert_eq!(sim.apply_line(&line, now).unwrap(), Disposition::Accepted);
        }
        assert_eq!(sim.speed(), speed);
        assert_eq!(sim.steer(), steer);
    }

    // Brake and disarm are accepted regardless of timing or state.
    now += Duration::from_millis(500);
    assert!(link.brake());
    assert!(link.disarm());
    let lines = wire.drain_lines();
    assert_eq!(lines, vec!["E:BRAKE_NOW", "M:SYS_DISARM"]);
    for line in &lines {
        assert_eq!(sim.apply_line(line, now).unwrap(), Disposition::Accepted);
    }
    assert_eq!(sim.state(), LinkState::Disarmed);
    assert_eq!(sim.speed(), 0);
}

#[test]
fn stalled_client_is_indistinguishable_from_a_severed_link() {
    let wire = Wire::default();
    let link = CommandLink::from_writer(wire.clone());
    let mut sim = ActuatorSim::new();
    let t0 = Instant::now();

    assert!(link.arm());
    assert!(link.set_mode(Mode::Auto));
    assert!(link.send_steering(105));
    for line in wire.drain_lines() {
        sim.apply_line(&line, t0).unwrap();
    }

    // The client keeps "running" but its lines never reach the actuator.
    assert!(link.send_steering(90));
    wire.drain_lines();

    let later = t0 + Duration::from_millis(200);
    assert!(sim.poll(later));
    assert_eq!(sim.state(), LinkState::Emergency);
    assert_eq!(sim.speed(), 0);

    // Commands stay rejected until a fresh arm sequence arrives.
    assert!(link.send_speed(64));
    for line in wire.drain_lines() {
        assert_eq!(
            sim.apply_line(&line, later).unwrap(),
            Disposition::Rejected
        );
    }
    assert!(link.arm());
    assert!(link.set_mode(Mode::Auto));
    assert!(link.send_speed(64));
    for line in wire.drain_lines() {
        assert_eq!(
            sim.apply_line(&line, later).unwrap(),
            Disposition::Accepted
        );
    }
}
