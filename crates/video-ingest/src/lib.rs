//! Frame acquisition for the detection service.
//!
//! Every backend ends up behind the [`FrameSource`] read-next-frame contract:
//! - V4L2 devices, RTSP feeds and video files are decoded by an FFmpeg child
//!   process on a background thread (`ffmpeg`).
//! - `pattern://` URIs produce synthetic frames (`pattern`).

mod ffmpeg;
mod pattern;
mod source;
mod types;

use std::time::Duration;

pub use ffmpeg::{
    FfmpegCapture, FfmpegProcess, spawn_device_reader, spawn_file_reader, spawn_rtsp_reader,
};
pub use pattern::PatternSource;
pub use source::{ChannelSource, FrameSource};
pub use types::{CaptureError, Frame, FrameFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Ingress transport used to source frames.
pub enum SourceKind {
    /// Local V4L devices (`0`, `/dev/video0`).
    Device,
    /// Real-time streaming protocol feeds.
    Rtsp,
    /// Pre-recorded video files.
    File,
    /// Synthetic test pattern.
    Pattern,
}

impl SourceKind {
    /// Infer the transport kind from a URI.
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if uri.starts_with("pattern://") {
            SourceKind::Pattern
        } else if ffmpeg::parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

#[derive(Clone, Copy, Debug)]
/// Capture settings shared by every source opened through [`open_source`].
pub struct SourceOptions {
    /// Output frame size (width, height); backends scale to it.
    pub target_size: (i32, i32),
    /// How long to wait for the first frame before giving up on a source.
    pub open_timeout: Duration,
    /// How long a single read may block before it is reported as a timeout.
    pub read_timeout: Duration,
    /// Pace file sources at their native frame rate.
    pub realtime_files: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            target_size: (640, 480),
            open_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            realtime_files: true,
        }
    }
}

/// Open the source behind `uri` and wait until it delivers its first frame.
pub fn open_source(
    uri: &str,
    options: &SourceOptions,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    let size = options.target_size;
    let capture = match SourceKind::from_uri(uri) {
        SourceKind::Pattern => return Ok(Box::new(PatternSource::new(uri, size)?)),
        SourceKind::Device => spawn_device_reader(uri, size),
        SourceKind::Rtsp => spawn_rtsp_reader(uri, size),
        SourceKind::File => {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            spawn_file_reader(path, size, options.realtime_files)
        }
    }
    .map_err(|err| CaptureError::Open {
        uri: uri.to_string(),
        reason: err.to_string(),
    })?;

    let source = ChannelSource::new(uri, capture.frames, options.read_timeout)
        .with_process(capture.process)
        .prime(options.open_timeout)?;
    Ok(Box::new(source))
}
