//! OpenCV-backed camera source feeding the frame mailbox.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use chrono::Utc;
use opencv::{
    core::MatTraitConstManual,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::{
    mailbox::FrameMailbox,
    types::{CaptureError, Frame, FrameFormat},
};

/// Default bounded wait for `get_frame` callers that do not care to tune it.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(50);

/// Nap between retries when the device momentarily fails to deliver.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Owns the camera device and runs the capture loop on a background thread.
///
/// The loop publishes every good frame into a single-slot [`FrameMailbox`];
/// consumers (control loop, stream subscribers) each pull independent copies
/// with a bounded wait.
pub struct CameraSource {
    uri: String,
    target_size: (i32, i32),
    fps: f64,
    mailbox: Arc<FrameMailbox>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CameraSource {
    pub fn new(uri: impl Into<String>, target_size: (i32, i32), fps: f64) -> Self {
        Self {
            uri: uri.into(),
            target_size,
            fps,
            mailbox: Arc::new(FrameMailbox::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Open the device and start the capture loop.
    ///
    /// A device that cannot be opened is the one unrecoverable failure in the
    /// system; everything after this point degrades to retry-next-tick.
    pub fn initialize(&self) -> Result<(), CaptureError> {
        let mut cap = open_video_capture(&self.uri)?;
        configure_camera(&mut cap, self.target_size, self.fps);
        debug!("camera opened at {}", self.uri);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let mailbox = self.mailbox.clone();
        let handle = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(cap, mailbox, running))
            .map_err(|e| CaptureError::Other(e.into()))?;

        if let Ok(mut worker) = self.worker.lock() {
            *worker = Some(handle);
        }
        Ok(())
    }

    /// Fetch an independent copy of the newest frame, waiting at most
    /// `timeout` for the mailbox lock. Absent data is a normal outcome.
    pub fn get_frame(&self, timeout: Duration) -> Option<Frame> {
        self.mailbox.take(timeout)
    }

    /// Stop the capture loop and release the device.
    ///
    /// Safe to call before `initialize()`, repeatedly, or concurrently; the
    /// device handle is released exactly once when the capture thread exits.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        debug!("camera stopped");
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture loop executed on the background thread. The `VideoCapture` handle
/// moves in here and is released on return.
fn capture_loop(mut cap: VideoCapture, mailbox: Arc<FrameMailbox>, running: Arc<AtomicBool>) {
    let mut mat = Mat::default();
    while running.load(Ordering::Relaxed) {
        let grabbed = match cap.read(&mut mat) {
            Ok(grabbed) => grabbed,
            Err(err) => {
                warn!("camera read failed: {err}");
                thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            }
        };
        if !grabbed {
            thread::sleep(CAPTURE_RETRY_DELAY);
            continue;
        }

        let size = match mat.size() {
            Ok(size) if size.width > 0 && size.height > 0 => size,
            Ok(_) => continue,
            Err(err) => {
                warn!("camera frame size query failed: {err}");
                thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            }
        };

        let data = match mat.data_bytes() {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                warn!("camera frame copy failed: {err}");
                thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            }
        };

        mailbox.publish(Frame {
            data,
            width: size.width,
            height: size.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        });
    }
    let _ = cap.release();
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (resolution, fps, preferred pixel format).
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
