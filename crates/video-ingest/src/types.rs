use thiserror::Error;

/// Raw BGR frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Wrap a packed BGR8 buffer, rejecting buffers that do not match the
    /// declared dimensions.
    pub fn from_bgr(
        data: Vec<u8>,
        width: i32,
        height: i32,
        timestamp_ms: i64,
    ) -> Result<Self, CaptureError> {
        let expected = Self::bgr_len(width, height);
        if width <= 0 || height <= 0 || data.len() != expected {
            return Err(CaptureError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms,
            format: FrameFormat::Bgr8,
        })
    }

    /// Byte length of a packed BGR8 frame.
    pub fn bgr_len(width: i32, height: i32) -> usize {
        (width.max(0) as usize) * (height.max(0) as usize) * 3
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}: {reason}")]
    Open { uri: String, reason: String },
    #[error("video source {uri:?} produced no frame within {timeout_ms} ms")]
    Timeout { uri: String, timeout_ms: u64 },
    #[error("frame buffer of {actual} bytes does not match {width}x{height} BGR ({expected} bytes)")]
    BufferSize {
        width: i32,
        height: i32,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
