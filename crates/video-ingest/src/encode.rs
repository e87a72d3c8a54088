//! JPEG encoding for stream subscribers and debug-image endpoints.

use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};

use crate::types::{Frame, FrameFormat};

/// Encode a frame as JPEG at the given quality (1-100).
///
/// Each stream subscriber encodes independently, so this takes a borrowed
/// frame and allocates a fresh buffer per call.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb = match frame.format {
        FrameFormat::Bgr8 => bgr_to_rgb(&frame.data),
    };
    let image =
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(frame.width as u32, frame.height as u32, rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn bgr_to_rgb(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.push(px[2]);
        rgb.push(px[1]);
        rgb.push(px[0]);
    }
    rgb
}
