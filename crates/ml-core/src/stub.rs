use anyhow::Result;
use video_ingest::Frame;

use crate::detection::{DetectionResult, FaceVerdict, MaskClassifier, ObjectDetector};

/// Detector used when no model backend is compiled in. Reports nothing, so
/// streams still run and show the raw camera feed.
#[derive(Debug, Default)]
pub struct StubDetector;

impl ObjectDetector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        Ok(DetectionResult::default())
    }
}

/// Mask classifier counterpart of [`StubDetector`].
#[derive(Debug, Default)]
pub struct StubMaskClassifier;

impl MaskClassifier for StubMaskClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    fn classify(&mut self, _frame: &Frame) -> Result<Vec<FaceVerdict>> {
        Ok(Vec::new())
    }
}
