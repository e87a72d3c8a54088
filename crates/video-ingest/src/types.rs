use thiserror::Error;

/// Raw frame captured from the camera.
///
/// Frames are value types: every consumer that pulls one out of the mailbox
/// receives its own pixel buffer, so mutation on one side never leaks into
/// another consumer or back into the mailbox.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl Frame {
    /// Number of bytes in one row of pixels.
    pub fn row_stride(&self) -> usize {
        match self.format {
            FrameFormat::Bgr8 => self.width as usize * 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
