//! Per-frame detector dispatch and overlay composition.
//!
//! [`FrameProcessor::process`] is the single place that maps a
//! [`DetectionMode`] to the detectors it runs, the overlays it draws and the
//! alert predicate it evaluates. Detectors always see the raw camera frame;
//! overlays are drawn afterwards on one canvas, object boxes first.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::{Context, Result, anyhow, bail};
use ml_core::{
    ClassLabels, DetectionResult, FaceVerdict, MaskClassifier, MaskState, ObjectDetector,
};
use tracing::{debug, warn};
use video_ingest::Frame;

use crate::vision::{
    alert::{AlertReason, RestrictedClasses, combined_alert, mask_alert, weapon_alert},
    annotation::{
        BannerEdge, BoxOverlay, GREEN, RED, SLATE, WHITE, draw_banner, draw_box, frame_to_canvas,
    },
    data::ProcessedFrame,
    mode::DetectionMode,
};

pub type SharedObjectDetector = Arc<Mutex<dyn ObjectDetector>>;
pub type SharedMaskClassifier = Arc<Mutex<dyn MaskClassifier>>;

/// COCO id used when the label set has no `person` entry.
const FALLBACK_PERSON_CLASS: i64 = 0;

/// Detector backends shared by every stream.
#[derive(Clone)]
pub struct Detectors {
    pub object: SharedObjectDetector,
    pub mask: SharedMaskClassifier,
}

impl Detectors {
    pub fn new(object: impl ObjectDetector + 'static, mask: impl MaskClassifier + 'static) -> Self {
        Self {
            object: Arc::new(Mutex::new(object)),
            mask: Arc::new(Mutex::new(mask)),
        }
    }
}

pub struct FrameProcessor {
    detectors: Detectors,
    labels: Arc<ClassLabels>,
    restricted: RestrictedClasses,
    person_class: i64,
}

impl FrameProcessor {
    pub fn new(
        detectors: Detectors,
        labels: Arc<ClassLabels>,
        restricted: RestrictedClasses,
        person_label: &str,
    ) -> Self {
        let person_class = labels.id_of(person_label).unwrap_or_else(|| {
            warn!(
                "label set has no {person_label:?} class; full-body mode filters on id {FALLBACK_PERSON_CLASS}"
            );
            FALLBACK_PERSON_CLASS
        });
        if restricted.is_empty() {
            warn!("no restricted classes resolved; weapon alerts are disabled");
        }
        Self {
            detectors,
            labels,
            restricted,
            person_class,
        }
    }

    pub fn person_class(&self) -> i64 {
        self.person_class
    }

    pub fn restricted(&self) -> &RestrictedClasses {
        &self.restricted
    }

    /// Run the detectors `mode` calls for, draw their output and decide the
    /// frame's alert.
    pub fn process(&self, mode: DetectionMode, frame: &Frame, sequence: u64) -> Result<ProcessedFrame> {
        if mode == DetectionMode::Inactive {
            bail!("no detection mode is active");
        }

        let mut objects = DetectionResult::default();
        let mut faces = Vec::new();
        if mode.runs_object_detector() {
            objects = self.detect_objects(frame)?;
        }
        if mode.runs_mask_classifier() {
            faces = self.classify_faces(frame)?;
        }
        if mode == DetectionMode::FullBody {
            objects = objects.retain_class(self.person_class);
        }

        // Full-body mode never alerts.
        let weapon = mode != DetectionMode::FullBody && weapon_alert(&objects, &self.restricted);
        let mask = mask_alert(&faces);
        let mut reasons = Vec::new();
        if weapon {
            reasons.push(AlertReason::RestrictedObject);
        }
        if mask {
            reasons.push(AlertReason::NoMask);
        }
        let alert = combined_alert(weapon, mask);

        let mut canvas = frame_to_canvas(frame)?;
        for overlay in self.object_overlays(&objects) {
            draw_box(&mut canvas, &overlay);
        }
        for overlay in face_overlays(&faces) {
            draw_box(&mut canvas, &overlay);
        }
        draw_banner(
            &mut canvas,
            BannerEdge::Top,
            &format!("{} #{sequence}", mode.label().replace('_', " ")),
            WHITE,
            SLATE,
        );
        if alert {
            draw_banner(&mut canvas, BannerEdge::Bottom, "ALERT", WHITE, RED);
            debug!(
                "frame {sequence} raised an alert ({} objects, {} faces)",
                objects.len(),
                faces.len()
            );
        }

        Ok(ProcessedFrame {
            canvas,
            mode,
            sequence,
            timestamp_ms: frame.timestamp_ms,
            objects,
            faces,
            alert,
            reasons,
        })
    }

    fn detect_objects(&self, frame: &Frame) -> Result<DetectionResult> {
        let start = Instant::now();
        let mut detector = self
            .detectors
            .object
            .lock()
            .map_err(|_| anyhow!("object detector poisoned"))?;
        let result = detector
            .detect(frame)
            .with_context(|| format!("object detector {} failed", detector.name()))?;
        metrics::histogram!("vision_stage_latency_seconds", "stage" => "detect")
            .record(start.elapsed().as_secs_f64());
        Ok(result)
    }

    fn classify_faces(&self, frame: &Frame) -> Result<Vec<FaceVerdict>> {
        let start = Instant::now();
        let mut classifier = self
            .detectors
            .mask
            .lock()
            .map_err(|_| anyhow!("mask classifier poisoned"))?;
        let faces = classifier
            .classify(frame)
            .with_context(|| format!("mask classifier {} failed", classifier.name()))?;
        metrics::histogram!("vision_stage_latency_seconds", "stage" => "classify")
            .record(start.elapsed().as_secs_f64());
        Ok(faces)
    }

    fn object_overlays(&self, objects: &DetectionResult) -> Vec<BoxOverlay> {
        objects
            .iter()
            .map(|det| {
                let name = self
                    .labels
                    .name(det.class_id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("class {}", det.class_id));
                BoxOverlay {
                    bbox_xywh: det.bbox_xywh,
                    color: if self.restricted.contains(det.class_id) {
                        RED
                    } else {
                        GREEN
                    },
                    label: format!("{name} {:.0}%", det.score * 100.0),
                }
            })
            .collect()
    }
}

fn face_overlays(faces: &[FaceVerdict]) -> Vec<BoxOverlay> {
    faces
        .iter()
        .map(|face| {
            let (text, color) = match face.state {
                MaskState::Mask => ("Mask", GREEN),
                MaskState::NoMask => ("No Mask", RED),
            };
            BoxOverlay {
                bbox_xywh: face.bbox_xywh,
                color,
                label: format!("{text} {:.0}%", face.confidence * 100.0),
            }
        })
        .collect()
}
