use image::RgbImage;
use ml_core::{DetectionResult, FaceVerdict};
use serde::Serialize;

use crate::vision::{alert::AlertReason, mode::DetectionMode};

/// One frame after detection and overlay drawing, before encoding.
#[derive(Debug)]
pub struct ProcessedFrame {
    pub canvas: RgbImage,
    pub mode: DetectionMode,
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub objects: DetectionResult,
    pub faces: Vec<FaceVerdict>,
    pub alert: bool,
    pub reasons: Vec<AlertReason>,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub mode: DetectionMode,
    pub open_handles: usize,
    pub active_streams: usize,
    pub restricted_class_ids: Vec<i64>,
    pub alert_sinks: Vec<String>,
}
