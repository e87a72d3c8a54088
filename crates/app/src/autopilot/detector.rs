//! Steering detector collaborators.
//!
//! The control loop only depends on the [`Detector`] contract: one call per
//! iteration, returning a curvature-derived steering angle plus an optional
//! set of named debug images. The bundled [`LaneDetector`] is deliberately
//! simple glue — a brightness threshold over the lower part of the frame,
//! a lane-centroid offset, and the PID controller it owns.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::{Result, anyhow};
use video_ingest::{Frame, FrameFormat};

use crate::autopilot::pid::PidController;

/// Result of one detector invocation. An empty debug set is a normal outcome
/// and must not clobber a previously stored non-empty one.
pub struct Detection {
    pub steering_angle: f64,
    pub debug_images: HashMap<String, Frame>,
}

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Detection>;
}

/// Fallback step length when there is no previous detection to measure from.
const NOMINAL_DT: f64 = 1.0 / 30.0;

/// Fraction of the frame (from the bottom) scanned for lane markings.
const SCAN_BAND: f64 = 1.0 / 3.0;

pub struct LaneDetector {
    threshold: u8,
    pid: Arc<Mutex<PidController>>,
    last_step: Option<Instant>,
}

impl LaneDetector {
    pub fn new(threshold: u8, pid: Arc<Mutex<PidController>>) -> Self {
        Self {
            threshold,
            pid,
            last_step: None,
        }
    }

    fn step_dt(&mut self) -> f64 {
        let now = Instant::now();
        let dt = self
            .last_step
            .map(|last| now.duration_since(last).as_secs_f64())
            .unwrap_or(NOMINAL_DT);
        self.last_step = Some(now);
        dt
    }
}

impl Detector for LaneDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Detection> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        if frame.data.len() < width * height * 3 {
            return Err(anyhow!("frame buffer shorter than {width}x{height} BGR"));
        }

        let band_start = height - ((height as f64 * SCAN_BAND) as usize).max(1);
        let mut mask = vec![0u8; width * height];
        let mut sum_x: u64 = 0;
        let mut hits: u64 = 0;

        for y in band_start..height {
            let row = &frame.data[y * width * 3..(y + 1) * width * 3];
            for (x, px) in row.chunks_exact(3).enumerate() {
                let luma =
                    (299 * px[2] as u32 + 587 * px[1] as u32 + 114 * px[0] as u32) / 1000;
                if luma as u8 >= self.threshold {
                    mask[y * width + x] = 255;
                    sum_x += x as u64;
                    hits += 1;
                }
            }
        }

        // No markings in view: hold straight rather than invent a correction.
        let error_px = if hits > 0 {
            sum_x as f64 / hits as f64 - width as f64 / 2.0
        } else {
            0.0
        };

        let dt = self.step_dt();
        let steering_angle = self
            .pid
            .lock()
            .map_err(|_| anyhow!("pid controller poisoned"))?
            .step(error_px, dt);

        let mut debug_images = HashMap::new();
        debug_images.insert("threshold".to_string(), mask_frame(&mask, frame));
        if hits > 0 {
            let centroid = (sum_x / hits) as usize;
            debug_images.insert(
                "overlay".to_string(),
                overlay_frame(frame, centroid, band_start),
            );
        }

        Ok(Detection {
            steering_angle,
            debug_images,
        })
    }
}

/// Expand a single-channel mask into a viewable BGR frame.
fn mask_frame(mask: &[u8], source: &Frame) -> Frame {
    let mut data = Vec::with_capacity(mask.len() * 3);
    for &value in mask {
        data.extend_from_slice(&[value, value, value]);
    }
    Frame {
        data,
        width: source.width,
        height: source.height,
        timestamp_ms: source.timestamp_ms,
        format: FrameFormat::Bgr8,
    }
}

/// Copy of the source frame with the detected lane centroid marked in green
/// and the frame center in blue, over the scanned band.
fn overlay_frame(source: &Frame, centroid_x: usize, band_start: usize) -> Frame {
    let mut frame = source.clone();
    let width = frame.width as usize;
    let height = frame.height as usize;
    let center_x = width / 2;
    for y in band_start..height {
        paint(&mut frame.data, y * width + centroid_x, [0, 255, 0]);
        paint(&mut frame.data, y * width + center_x, [255, 0, 0]);
    }
    frame
}

fn paint(data: &mut [u8], pixel: usize, bgr: [u8; 3]) {
    let offset = pixel * 3;
    if offset + 3 <= data.len() {
        data[offset..offset + 3].copy_from_slice(&bgr);
    }
}
