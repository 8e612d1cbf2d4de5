//! Scripted sources and detectors for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, anyhow};
use ml_core::{Detection, DetectionResult, FaceVerdict, MaskClassifier, MaskState, ObjectDetector};
use video_ingest::{CaptureError, Frame, FrameSource};

use crate::vision::{controller::SourceFactory, mode::CameraSlot};

pub(crate) fn frame(width: i32, height: i32) -> Frame {
    Frame::from_bgr(vec![90; Frame::bgr_len(width, height)], width, height, 0).unwrap()
}

pub(crate) fn detection(class_id: i64, score: f32) -> Detection {
    Detection {
        bbox_xywh: [20.0, 30.0, 16.0, 16.0],
        score,
        class_id,
    }
}

pub(crate) fn face(state: MaskState) -> FaceVerdict {
    FaceVerdict {
        bbox_xywh: [4.0, 4.0, 12.0, 12.0],
        state,
        confidence: 0.9,
    }
}

/// Records detector invocations in call order.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    fn push(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

type DetectHook = Box<dyn FnMut(u64) + Send>;

/// Object detector replaying per-frame detections. Once the script runs out
/// the last entry repeats.
pub(crate) struct ScriptedDetector {
    script: VecDeque<Vec<Detection>>,
    last: Vec<Detection>,
    fail: bool,
    calls: u64,
    log: Option<CallLog>,
    hook: Option<DetectHook>,
}

impl ScriptedDetector {
    pub(crate) fn per_frame(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            last: Vec::new(),
            fail: false,
            calls: 0,
            log: None,
            hook: None,
        }
    }

    pub(crate) fn always(detections: Vec<Detection>) -> Self {
        Self::per_frame(vec![detections])
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::per_frame(Vec::new())
        }
    }

    pub(crate) fn logging(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run `hook` with the 1-based call number on every detection.
    pub(crate) fn on_detect(mut self, hook: impl FnMut(u64) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }
}

impl ObjectDetector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        self.calls += 1;
        if let Some(log) = &self.log {
            log.push("detect");
        }
        if let Some(hook) = self.hook.as_mut() {
            hook(self.calls);
        }
        if self.fail {
            return Err(anyhow!("model exploded"));
        }
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(DetectionResult::new(self.last.clone()))
    }
}

pub(crate) struct ScriptedMasks {
    faces: Vec<FaceVerdict>,
    log: Option<CallLog>,
}

impl ScriptedMasks {
    pub(crate) fn always(faces: Vec<FaceVerdict>) -> Self {
        Self { faces, log: None }
    }

    pub(crate) fn logging(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl MaskClassifier for ScriptedMasks {
    fn name(&self) -> &str {
        "scripted"
    }

    fn classify(&mut self, _frame: &Frame) -> Result<Vec<FaceVerdict>> {
        if let Some(log) = &self.log {
            log.push("classify");
        }
        Ok(self.faces.clone())
    }
}

/// Source yielding `remaining` small frames (forever when `None`). Tracks how
/// many instances are alive so tests can check that handles get dropped.
struct FakeSource {
    uri: String,
    remaining: Option<usize>,
    live: Arc<AtomicUsize>,
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.remaining.as_mut() {
            Some(0) => return Ok(None),
            Some(left) => *left -= 1,
            None => {}
        }
        Ok(Some(frame(32, 24)))
    }

    fn describe(&self) -> &str {
        &self.uri
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct FakeSourceFactory {
    frames: Option<usize>,
    opened: Mutex<Vec<String>>,
    live: Arc<AtomicUsize>,
    fail_next: AtomicBool,
    open_delay: Duration,
}

impl FakeSourceFactory {
    pub(crate) fn endless() -> Self {
        Self::with_frames(None)
    }

    pub(crate) fn finite(frames: usize) -> Self {
        Self::with_frames(Some(frames))
    }

    fn with_frames(frames: Option<usize>) -> Self {
        Self {
            frames,
            opened: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            fail_next: AtomicBool::new(false),
            open_delay: Duration::ZERO,
        }
    }

    /// Every open blocks for `delay`, like a slow RTSP handshake.
    pub(crate) fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub(crate) fn opened_uris(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl SourceFactory for FakeSourceFactory {
    fn open(&self, _slot: CameraSlot, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        if !self.open_delay.is_zero() {
            thread::sleep(self.open_delay);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::Open {
                uri: uri.to_string(),
                reason: "device busy".into(),
            });
        }
        self.opened.lock().unwrap().push(uri.to_string());
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            uri: uri.to_string(),
            remaining: self.frames,
            live: self.live.clone(),
        }))
    }
}
