//! JPEG encoding and multipart part framing for the MJPEG feeds.
//!
//! Each part carries its sequence number and the frame's alert flag as part
//! headers so the stream stays valid `multipart/x-mixed-replace`:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! X-Sequence: 7\r\n
//! X-Alert: 1\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use std::time::Instant;

use actix_web::web::Bytes;
use anyhow::{Context, Result};
use image::{RgbImage, codecs::jpeg::JpegEncoder};

macro_rules! boundary {
    () => {
        "frame"
    };
}

pub const BOUNDARY: &str = boundary!();
pub const MULTIPART_CONTENT_TYPE: &str =
    concat!("multipart/x-mixed-replace; boundary=", boundary!());
pub const ALERT_HEADER: &str = "X-Alert";

/// Encode an RGB canvas. `None` keeps the encoder's default quality.
pub fn encode_jpeg(canvas: &RgbImage, quality: Option<u8>) -> Result<Vec<u8>> {
    let start = Instant::now();
    let mut buffer = Vec::with_capacity(canvas.as_raw().len() / 8);
    {
        let mut encoder = match quality {
            Some(quality) => JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)),
            None => JpegEncoder::new(&mut buffer),
        };
        encoder
            .encode_image(canvas)
            .context("JPEG encode failed")?;
    }
    metrics::histogram!("vision_stage_latency_seconds", "stage" => "encoding")
        .record(start.elapsed().as_secs_f64());
    Ok(buffer)
}

pub fn multipart_chunk(jpeg: &[u8], sequence: u64, alert: bool) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 96);
    payload.extend_from_slice(b"--");
    payload.extend_from_slice(BOUNDARY.as_bytes());
    payload.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n");
    payload.extend_from_slice(format!("X-Sequence: {sequence}\r\n").as_bytes());
    payload.extend_from_slice(format!("{ALERT_HEADER}: {}\r\n\r\n", u8::from(alert)).as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}
