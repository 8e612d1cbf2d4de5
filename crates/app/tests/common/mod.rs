//! Camera and detector doubles shared by the HTTP tests.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use ml_core::{ClassLabels, Detection, DetectionResult, FaceVerdict, MaskClassifier, ObjectDetector};
use threat_vision::vision::{
    CameraSlot, CameraSources, ModeController, SourceFactory,
    alert::{AlertDispatcher, AlertEvent, BroadcastAlert, DEFAULT_RESTRICTED_CLASSES, RestrictedClasses},
    pipeline::StreamContext,
    processing::{Detectors, FrameProcessor},
    server::ServerState,
};
use tokio::sync::broadcast;
use video_ingest::{CaptureError, Frame, FrameSource};

pub const KNIFE: i64 = 43;

pub fn knife() -> Detection {
    Detection {
        bbox_xywh: [8.0, 8.0, 12.0, 10.0],
        score: 0.8,
        class_id: KNIFE,
    }
}

struct CountdownSource {
    remaining: usize,
}

impl FrameSource for CountdownSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(Frame::from_bgr(vec![60; Frame::bgr_len(48, 32)], 48, 32, 0)?))
    }

    fn describe(&self) -> &str {
        "countdown"
    }
}

/// Opens sources that deliver `frames` frames, or refuses every open.
pub struct TestCameras {
    frames: usize,
    broken: AtomicBool,
    opened: Mutex<Vec<(CameraSlot, String)>>,
}

impl TestCameras {
    pub fn with_frames(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            frames,
            broken: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn broken() -> Arc<Self> {
        let cameras = Self::with_frames(0);
        cameras.broken.store(true, Ordering::SeqCst);
        cameras
    }

    pub fn opened(&self) -> Vec<(CameraSlot, String)> {
        self.opened.lock().unwrap().clone()
    }
}

impl SourceFactory for TestCameras {
    fn open(&self, slot: CameraSlot, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(CaptureError::Open {
                uri: uri.to_string(),
                reason: "no such device".into(),
            });
        }
        self.opened.lock().unwrap().push((slot, uri.to_string()));
        Ok(Box::new(CountdownSource {
            remaining: self.frames,
        }))
    }
}

/// Replays one detection list per frame, repeating the last.
pub struct ReplayDetector {
    script: Vec<Vec<Detection>>,
    calls: usize,
}

impl ReplayDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, calls: 0 }
    }
}

impl ObjectDetector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        let index = self.calls.min(self.script.len().saturating_sub(1));
        self.calls += 1;
        Ok(DetectionResult::new(self.script.get(index).cloned().unwrap_or_default()))
    }
}

pub struct FixedFaces(pub Vec<FaceVerdict>);

impl MaskClassifier for FixedFaces {
    fn name(&self) -> &str {
        "fixed"
    }

    fn classify(&mut self, _frame: &Frame) -> Result<Vec<FaceVerdict>> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub state: ServerState,
    pub controller: Arc<ModeController>,
    pub alerts: broadcast::Receiver<AlertEvent>,
}

pub fn harness(cameras: Arc<TestCameras>, detector: ReplayDetector, faces: FixedFaces) -> Harness {
    let labels = Arc::new(ClassLabels::coco());
    let restricted = RestrictedClasses::resolve(&DEFAULT_RESTRICTED_CLASSES, &labels);
    let processor = FrameProcessor::new(Detectors::new(detector, faces), labels, restricted, "person");

    let sources = CameraSources {
        weapon: "cam-weapon".into(),
        mask: "cam-mask".into(),
        body: "cam-body".into(),
    };
    let controller = Arc::new(ModeController::new(sources, cameras));
    let (tx, alerts) = broadcast::channel(16);
    let dispatcher = AlertDispatcher::new().with_sink(Arc::new(BroadcastAlert::new(tx.clone())));
    let stream = Arc::new(StreamContext::new(controller.clone(), Arc::new(processor), dispatcher));

    Harness {
        state: ServerState::new(stream, tx),
        controller,
        alerts,
    }
}

/// Split a multipart body into its per-part headers.
pub fn part_headers(body: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(body);
    text.split("--frame\r\n")
        .skip(1)
        .filter_map(|part| part.split_once("\r\n\r\n").map(|(headers, _)| headers.to_string()))
        .collect()
}
