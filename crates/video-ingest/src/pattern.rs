//! Synthetic test-pattern source (`pattern://`).
//!
//! Produces a moving colour-bar frame at a fixed rate so the stream can be
//! exercised without a camera. `pattern://bars?fps=15&frames=300` limits the
//! rate and the number of frames; both are optional.

use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use chrono::Utc;

use crate::{
    source::FrameSource,
    types::{CaptureError, Frame},
};

const DEFAULT_FPS: u32 = 15;

pub struct PatternSource {
    uri: String,
    width: i32,
    height: i32,
    interval: Duration,
    frame_limit: Option<u64>,
    produced: u64,
    last_emit: Option<Instant>,
}

impl PatternSource {
    pub fn new(uri: &str, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let (width, height) = target_size;
        if width <= 0 || height <= 0 {
            return Err(CaptureError::Open {
                uri: uri.to_string(),
                reason: format!("invalid pattern size {width}x{height}"),
            });
        }

        let mut fps = DEFAULT_FPS;
        let mut frame_limit = None;
        if let Some((_, query)) = uri.split_once('?') {
            for pair in query.split('&') {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                match key {
                    "fps" => {
                        fps = value
                            .parse::<u32>()
                            .ok()
                            .filter(|fps| *fps > 0)
                            .ok_or_else(|| {
                                CaptureError::Other(anyhow!("invalid fps {value:?} in {uri}"))
                            })?;
                    }
                    "frames" => {
                        frame_limit = Some(value.parse::<u64>().map_err(|_| {
                            CaptureError::Other(anyhow!("invalid frame count {value:?} in {uri}"))
                        })?);
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            uri: uri.to_string(),
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps as f64),
            frame_limit,
            produced: 0,
            last_emit: None,
        })
    }

    fn render(&self) -> Vec<u8> {
        const BARS: [[u8; 3]; 7] = [
            [255, 255, 255],
            [0, 255, 255],
            [255, 255, 0],
            [0, 255, 0],
            [255, 0, 255],
            [0, 0, 255],
            [255, 0, 0],
        ];
        let width = self.width as usize;
        let height = self.height as usize;
        let bar_width = (width / BARS.len()).max(1);
        let shift = (self.produced as usize * 4) % width.max(1);

        let mut data = Vec::with_capacity(width * height * 3);
        for _ in 0..height {
            for x in 0..width {
                let bar = ((x + shift) / bar_width) % BARS.len();
                data.extend_from_slice(&BARS[bar]);
            }
        }
        data
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }

        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());

        let frame = Frame::from_bgr(
            self.render(),
            self.width,
            self.height,
            Utc::now().timestamp_millis(),
        )?;
        self.produced += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> &str {
        &self.uri
    }
}
