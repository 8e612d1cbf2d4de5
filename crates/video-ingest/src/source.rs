//! Pull-based frame sources.
//!
//! Capture backends push frames into a bounded channel from their own thread;
//! [`ChannelSource`] turns that channel back into a read-next-frame contract
//! so callers decide when to pull and can drop the source to stop capture.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;

use crate::{
    ffmpeg::FfmpegProcess,
    types::{CaptureError, Frame},
};

/// Anything that can hand out frames one at a time.
pub trait FrameSource: Send {
    /// Read the next frame. `Ok(None)` signals that the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// URI or other human readable identifier of the source.
    fn describe(&self) -> &str;
}

/// Adapter over the receiver returned by the `spawn_*_reader` helpers.
///
/// Dropping the source drops the receiver and, when one is attached, kills
/// the backing FFmpeg process before returning.
pub struct ChannelSource {
    uri: String,
    rx: Receiver<Result<Frame, CaptureError>>,
    pending: Option<Frame>,
    read_timeout: Duration,
    finished: bool,
    process: Option<FfmpegProcess>,
}

impl ChannelSource {
    pub fn new(
        uri: impl Into<String>,
        rx: Receiver<Result<Frame, CaptureError>>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            uri: uri.into(),
            rx,
            pending: None,
            read_timeout,
            finished: false,
            process: None,
        }
    }

    /// Tie the lifetime of `process` to this source.
    pub fn with_process(mut self, process: FfmpegProcess) -> Self {
        self.process = Some(process);
        self
    }

    /// Block until the first frame arrives so an unusable device fails here
    /// instead of producing an empty stream later. The frame is kept and
    /// returned by the first `next_frame` call.
    pub fn prime(mut self, timeout: Duration) -> Result<Self, CaptureError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => {
                debug!(
                    "source {} primed with {}x{} frame",
                    self.uri, frame.width, frame.height
                );
                self.pending = Some(frame);
                Ok(self)
            }
            Ok(Err(err)) => Err(CaptureError::Open {
                uri: self.uri,
                reason: err.to_string(),
            }),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout {
                uri: self.uri,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Open {
                uri: self.uri,
                reason: "capture ended before the first frame".to_string(),
            }),
        }
    }
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(err)) => {
                self.finished = true;
                Err(err)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Ok(None)
            }
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout {
                uri: self.uri.clone(),
                timeout_ms: self.read_timeout.as_millis() as u64,
            }),
        }
    }

    fn describe(&self) -> &str {
        &self.uri
    }
}
