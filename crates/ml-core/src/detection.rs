//! Detection types and the detector seams consumed by the stream pipeline.

use anyhow::Result;
use serde::Serialize;
use video_ingest::Frame;

/// Single detection returned by an object detector.
///
/// `bbox_xywh` is in frame pixels: left, top, width, height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub bbox_xywh: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.bbox_xywh[2].max(0.0) * self.bbox_xywh[3].max(0.0)
    }

    /// Intersection over union of two boxes.
    pub fn iou(&self, other: &Detection) -> f32 {
        let [ax, ay, aw, ah] = self.bbox_xywh;
        let [bx, by, bw, bh] = other.bbox_xywh;
        let left = ax.max(bx);
        let top = ay.max(by);
        let right = (ax + aw).min(bx + bw);
        let bottom = (ay + ah).min(by + bh);
        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }
}

/// Ordered detections for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    /// Keep only detections of `class_id`, preserving order. Boxes, scores and
    /// class ids stay aligned because they travel in one struct.
    pub fn retain_class(mut self, class_id: i64) -> Self {
        self.detections.retain(|det| det.class_id == class_id);
        self
    }

    pub fn class_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.detections.iter().map(|det| det.class_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskState {
    Mask,
    NoMask,
}

/// A face found by the mask classifier together with its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceVerdict {
    pub bbox_xywh: [f32; 4],
    pub state: MaskState,
    pub confidence: f32,
}

/// Object detector seam (YOLO-style models).
pub trait ObjectDetector: Send {
    /// Backend identifier used in logs.
    fn name(&self) -> &str;

    /// Run detection on a BGR frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;
}

/// Face mask classifier seam. Finds faces and classifies each one.
pub trait MaskClassifier: Send {
    fn name(&self) -> &str;

    fn classify(&mut self, frame: &Frame) -> Result<Vec<FaceVerdict>>;
}

/// Greedy non-maximum suppression, applied per class. Highest scores win.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id && existing.iou(&candidate) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, score: f32, class_id: i64) -> Detection {
        Detection {
            bbox_xywh: [x, 0.0, 10.0, 10.0],
            score,
            class_id,
        }
    }

    #[test]
    fn retain_class_keeps_order_and_alignment() {
        let result = DetectionResult::new(vec![
            det(0.0, 0.9, 0),
            det(20.0, 0.8, 43),
            det(40.0, 0.7, 0),
        ]);
        let people = result.retain_class(0);
        assert_eq!(people.len(), 2);
        assert_eq!(people.detections[0].bbox_xywh[0], 0.0);
        assert_eq!(people.detections[1].score, 0.7);
        assert!(people.class_ids().all(|id| id == 0));
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_the_same_class_only() {
        let kept = non_max_suppression(
            vec![det(1.0, 0.6, 0), det(0.0, 0.9, 0), det(0.0, 0.5, 2), det(50.0, 0.4, 0)],
            0.5,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert!(kept.iter().any(|d| d.class_id == 2));
        assert!(kept.iter().any(|d| d.bbox_xywh[0] == 50.0));
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(det(0.0, 1.0, 0).iou(&det(100.0, 1.0, 0)), 0.0);
        assert!((det(0.0, 1.0, 0).iou(&det(0.0, 1.0, 0)) - 1.0).abs() < 1e-6);
    }
}
