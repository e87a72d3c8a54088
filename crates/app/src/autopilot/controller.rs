//! Control-loop orchestrator: frame → detector → converter → command link.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use actuator_link::CommandLink;
use tracing::{debug, info, warn};
use video_ingest::{CameraSource, Frame};

use crate::autopilot::{
    converter::AngleConverter,
    data::{ControlStats, ControlStatus, PidUpdate},
    detector::Detector,
    pid::{PidController, PidGains},
};

/// Target cadence of the loop (~30 Hz). The loop is rate-limited by sleep,
/// not by compensating elapsed time, so the effective rate degrades under
/// load instead of catching up. This cadence doubles as the heartbeat that
/// keeps the actuator's AUTO-mode watchdog fed.
const LOOP_INTERVAL: Duration = Duration::from_millis(33);

/// Bounded wait when pulling a frame from the mailbox.
const FRAME_TIMEOUT: Duration = Duration::from_millis(50);

/// Extended backoff after an unexpected iteration failure.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Anything that can hand the loop the freshest frame within a bounded wait.
pub trait FrameProvider: Send + Sync {
    fn get_frame(&self, timeout: Duration) -> Option<Frame>;
}

impl FrameProvider for CameraSource {
    fn get_frame(&self, timeout: Duration) -> Option<Frame> {
        CameraSource::get_frame(self, timeout)
    }
}

pub struct AutopilotController {
    shared: Arc<Shared>,
}

struct Shared {
    running: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    stats: Mutex<ControlStats>,
    debug_images: Mutex<HashMap<String, Frame>>,
    detector: Mutex<Box<dyn Detector>>,
    pid: Arc<Mutex<PidController>>,
    converter: AngleConverter,
    frames: Arc<dyn FrameProvider>,
    link: Arc<CommandLink>,
}

impl AutopilotController {
    pub fn new(
        frames: Arc<dyn FrameProvider>,
        detector: Box<dyn Detector>,
        pid: Arc<Mutex<PidController>>,
        converter: AngleConverter,
        link: Arc<CommandLink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
                stats: Mutex::new(ControlStats::default()),
                debug_images: Mutex::new(HashMap::new()),
                detector: Mutex::new(detector),
                pid,
                converter,
                frames,
                link,
            }),
        }
    }

    /// Start the control loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let Ok(mut worker) = self.shared.worker.lock() else {
            return false;
        };
        if self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("control-loop".into())
            .spawn(move || control_loop(shared));
        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                info!("control loop started");
                true
            }
            Err(err) => {
                warn!("failed to spawn control loop: {err}");
                self.shared.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop the control loop and join its thread. Returns `false` if it was
    /// not running.
    pub fn stop(&self) -> bool {
        let handle = {
            let Ok(mut worker) = self.shared.worker.lock() else {
                return false;
            };
            if !self.shared.running.load(Ordering::SeqCst) {
                return false;
            }
            self.shared.running.store(false, Ordering::SeqCst);
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        info!("control loop stopped");
        true
    }

    pub fn status(&self) -> ControlStatus {
        let stats = self
            .shared
            .stats
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default();
        ControlStatus {
            running: self.shared.running.load(Ordering::SeqCst),
            last_steering_angle: stats.last_steering_angle,
            last_servo_angle: stats.last_servo_angle,
            command_count: stats.command_count,
            error_count: stats.error_count,
        }
    }

    /// Apply a partial PID update; the gain change and the state reset happen
    /// under one lock.
    pub fn update_pid(&self, update: PidUpdate) {
        if let Ok(mut pid) = self.shared.pid.lock() {
            pid.apply_update(update);
            debug!("pid gains updated: {:?}", pid.gains());
        }
    }

    pub fn pid_gains(&self) -> PidGains {
        self.shared
            .pid
            .lock()
            .map(|pid| pid.gains())
            .unwrap_or_default()
    }

    /// Defensive copy of a stored debug image. Absent key or absent set is
    /// `None`, never an error.
    pub fn debug_image(&self, key: &str) -> Option<Frame> {
        self.shared
            .debug_images
            .lock()
            .ok()
            .and_then(|images| images.get(key).cloned())
    }

    /// Keys of the currently retained debug image set.
    pub fn debug_image_keys(&self) -> Vec<String> {
        self.shared
            .debug_images
            .lock()
            .map(|images| images.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn control_loop(shared: Arc<Shared>) {
    while shared.running.load(Ordering::Relaxed) {
        let nap = iterate(&shared);
        thread::sleep(nap);
    }
}

/// One control iteration; returns how long the loop should sleep before the
/// next. A failure inside an iteration is counted and backed off, never
/// allowed to end the loop — only `stop()` does that.
fn iterate(shared: &Shared) -> Duration {
    let Some(frame) = shared.frames.get_frame(FRAME_TIMEOUT) else {
        // Absent data is a normal outcome, not an error.
        return LOOP_INTERVAL;
    };

    let detection = match shared.detector.lock() {
        Ok(mut detector) => detector.detect(&frame),
        Err(_) => Err(anyhow::anyhow!("detector poisoned")),
    };

    let detection = match detection {
        Ok(detection) => detection,
        Err(err) => {
            warn!("control iteration failed: {err}");
            record_error(shared);
            return ERROR_BACKOFF;
        }
    };

    // Retain the previous debug set when the detector produced none this
    // frame; the most recent available visualization stays inspectable.
    if !detection.debug_images.is_empty() {
        if let Ok(mut images) = shared.debug_images.lock() {
            *images = detection.debug_images;
        }
    }

    let servo_angle = shared.converter.convert(detection.steering_angle);
    let sent = shared.link.send_steering(servo_angle);

    if let Ok(mut stats) = shared.stats.lock() {
        stats.last_steering_angle = Some(detection.steering_angle);
        stats.last_servo_angle = Some(servo_angle);
        if sent {
            stats.command_count += 1;
        } else {
            stats.error_count += 1;
        }
    }
    if sent {
        metrics::counter!("lanekeeper_commands_total").increment(1);
    } else {
        metrics::counter!("lanekeeper_command_errors_total").increment(1);
    }
    metrics::gauge!("lanekeeper_steering_angle_degrees").set(detection.steering_angle);
    metrics::gauge!("lanekeeper_servo_angle_degrees").set(servo_angle as f64);

    LOOP_INTERVAL
}

fn record_error(shared: &Shared) {
    if let Ok(mut stats) = shared.stats.lock() {
        stats.error_count += 1;
    }
    metrics::counter!("lanekeeper_iteration_errors_total").increment(1);
}

#[cfg(test)]
mod tests {
    use std::io;

    use anyhow::{Result, anyhow};
    use video_ingest::FrameFormat;

    use super::*;
    use crate::autopilot::detector::Detection;

    struct StubFrames(Option<Frame>);

    impl FrameProvider for StubFrames {
        fn get_frame(&self, _timeout: Duration) -> Option<Frame> {
            self.0.clone()
        }
    }

    struct NullSink;

    impl io::Write for NullSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Detector returning a scripted sequence of outcomes, then holding the
    /// last one.
    struct ScriptedDetector {
        script: Vec<Result<(f64, Vec<&'static str>)>>,
        cursor: usize,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Result<(f64, Vec<&'static str>)>>) -> Self {
            Self { script, cursor: 0 }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Detection> {
            let index = self.cursor.min(self.script.len() - 1);
            self.cursor += 1;
            match &self.script[index] {
                Ok((angle, keys)) => Ok(Detection {
                    steering_angle: *angle,
                    debug_images: keys
                        .iter()
                        .map(|key| (key.to_string(), frame.clone()))
                        .collect(),
                }),
                Err(err) => Err(anyhow!("{err}")),
            }
        }
    }

    fn test_frame() -> Frame {
        Frame {
            data: vec![0; 12],
            width: 2,
            height: 2,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    fn controller_with(
        frames: Option<Frame>,
        script: Vec<Result<(f64, Vec<&'static str>)>>,
    ) -> AutopilotController {
        let pid = Arc::new(Mutex::new(PidController::new(PidGains::default())));
        AutopilotController::new(
            Arc::new(StubFrames(frames)),
            Box::new(ScriptedDetector::new(script)),
            pid,
            AngleConverter::default(),
            Arc::new(CommandLink::from_writer(NullSink)),
        )
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let controller = controller_with(None, vec![Ok((0.0, vec![]))]);
        assert!(!controller.stop());
        assert!(controller.start());
        assert!(!controller.start());
        assert!(controller.stop());
        assert!(!controller.stop());
    }

    #[test]
    fn empty_debug_set_does_not_clobber_the_stored_one() {
        let controller = controller_with(
            Some(test_frame()),
            vec![
                Ok((5.0, vec!["threshold", "overlay"])),
                Ok((6.0, vec![])),
            ],
        );
        iterate(&controller.shared);
        assert_eq!(controller.debug_image_keys().len(), 2);

        iterate(&controller.shared);
        let mut keys = controller.debug_image_keys();
        keys.sort();
        assert_eq!(keys, ["overlay", "threshold"]);
        assert!(controller.debug_image("threshold").is_some());
        assert!(controller.debug_image("no-such-stage").is_none());
    }

    #[test]
    fn debug_image_returns_a_defensive_copy() {
        let controller = controller_with(Some(test_frame()), vec![Ok((0.0, vec!["overlay"]))]);
        iterate(&controller.shared);

        let mut copy = controller.debug_image("overlay").unwrap();
        copy.data.fill(255);
        let fresh = controller.debug_image("overlay").unwrap();
        assert!(fresh.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn successful_iterations_update_stats_and_angles() {
        let controller = controller_with(Some(test_frame()), vec![Ok((-15.0, vec![]))]);
        let nap = iterate(&controller.shared);
        assert_eq!(nap, LOOP_INTERVAL);

        let status = controller.status();
        assert_eq!(status.command_count, 1);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.last_steering_angle, Some(-15.0));
        assert_eq!(status.last_servo_angle, Some(90));
    }

    #[test]
    fn detector_failure_is_counted_and_backed_off_without_ending_the_loop() {
        let controller = controller_with(
            Some(test_frame()),
            vec![Err(anyhow!("inference exploded")), Ok((0.0, vec![]))],
        );
        assert_eq!(iterate(&controller.shared), ERROR_BACKOFF);
        assert_eq!(controller.status().error_count, 1);

        // The next iteration proceeds normally.
        assert_eq!(iterate(&controller.shared), LOOP_INTERVAL);
        assert_eq!(controller.status().command_count, 1);
    }

    #[test]
    fn absent_frame_is_not_an_error() {
        let controller = controller_with(None, vec![Ok((0.0, vec![]))]);
        assert_eq!(iterate(&controller.shared), LOOP_INTERVAL);
        let status = controller.status();
        assert_eq!(status.error_count, 0);
        assert_eq!(status.command_count, 0);
    }

    #[test]
    fn pid_update_changes_gains_and_resets_state() {
        let controller = controller_with(None, vec![Ok((0.0, vec![]))]);
        {
            let mut pid = controller.shared.pid.lock().unwrap();
            pid.step(100.0, 0.1);
            assert!(pid.accumulated_integral() != 0.0);
        }
        controller.update_pid(PidUpdate {
            kp: Some(0.1),
            ki: None,
            kd: None,
        });
        let gains = controller.pid_gains();
        assert_eq!(gains.kp, 0.1);
        assert_eq!(gains.ki, 0.002);
        assert_eq!(
            controller.shared.pid.lock().unwrap().accumulated_integral(),
            0.0
        );
    }
}
