//! Camera capture, the single-slot frame mailbox, and JPEG encoding.
//!
//! The capture loop runs on its own thread and continuously overwrites the
//! mailbox with the newest frame; every reader receives an independent copy
//! within a bounded wait. There is intentionally no frame queue: consumers
//! want the freshest frame, never a backlog.

pub use camera::{CameraSource, DEFAULT_FRAME_TIMEOUT};
pub use encode::encode_jpeg;
pub use mailbox::FrameMailbox;
pub use types::{CaptureError, Frame, FrameFormat};

mod camera;
mod encode;
mod mailbox;
mod types;
