use std::{convert::TryFrom, path::Path};

use anyhow::{Result, bail};
use tch::{self, Device, Kind, Tensor};
use video_ingest::{Frame, FrameFormat};

use crate::detection::{Detection, DetectionResult, ObjectDetector, non_max_suppression};

const MAX_DETECTIONS: usize = 512;

/// TorchScript-backed YOLO detector.
///
/// Expects a YOLOv8-style export whose output is `[1, 4 + classes, anchors]`
/// with centre-x, centre-y, width, height in detector input pixels followed by
/// per-class scores.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TorchDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
    ) -> Result<Self> {
        let mut module = tch::CModule::load_on_device(model_path, device)?;
        module.set_eval();
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold: 0.5,
            iou_threshold: 0.4,
        })
    }

    /// Override the confidence threshold used for filtering detections.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn with_iou_threshold(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    /// Converts a BGR frame into a normalized RGB NCHW tensor resized to the
    /// detector input.
    pub fn bgr_to_tensor(&self, frame: &Frame) -> Result<Tensor> {
        let tensor = frame_to_tensor(frame, self.device)?;
        let (in_w, in_h) = self.input_size;
        if (frame.width as i64, frame.height as i64) == (in_w, in_h) {
            Ok(tensor)
        } else {
            Ok(tensor.upsample_bilinear2d([in_h, in_w], false, None, None))
        }
    }

    /// Executes the TorchScript module, thresholds, runs NMS and maps boxes
    /// back to `frame_size` pixels.
    pub fn infer(&self, input: &Tensor, frame_size: (i32, i32)) -> Result<DetectionResult> {
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))?;
        let shape = output.size();
        if shape.len() != 3 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[0] != 1 {
            bail!("detector expected batch=1 but received {}", shape[0]);
        }
        if shape[1] < 5 {
            bail!(
                "detector output requires at least 5 channels (x,y,w,h,class...), got {}",
                shape[1]
            );
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)?;

        let (in_w, in_h) = self.input_size;
        let scale_x = frame_size.0 as f32 / in_w.max(1) as f32;
        let scale_y = frame_size.1 as f32 / in_h.max(1) as f32;

        let mut candidates = Vec::new();
        for row in rows {
            let Some((class_idx, score)) = row
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            candidates.push(Detection {
                bbox_xywh: [
                    (cx - w / 2.0) * scale_x,
                    (cy - h / 2.0) * scale_y,
                    w * scale_x,
                    h * scale_y,
                ],
                score,
                class_id: class_idx as i64,
            });
        }

        let mut kept = non_max_suppression(candidates, self.iou_threshold);
        kept.truncate(MAX_DETECTIONS);
        Ok(DetectionResult::new(kept))
    }
}

impl ObjectDetector for TorchDetector {
    fn name(&self) -> &str {
        "torchscript"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.bgr_to_tensor(frame)?;
        self.infer(&input, (frame.width, frame.height))
    }
}

/// BGR8 frame → `[1, 3, H, W]` float RGB tensor in `0..1`.
pub(crate) fn frame_to_tensor(frame: &Frame, device: Device) -> Result<Tensor> {
    let FrameFormat::Bgr8 = frame.format;
    let expected = Frame::bgr_len(frame.width, frame.height);
    if frame.data.len() != expected {
        bail!(
            "unexpected frame buffer size: got {} bytes, expected {}",
            frame.data.len(),
            expected
        );
    }

    let tensor = Tensor::from_slice(&frame.data)
        .to_device(device)
        .view([frame.height as i64, frame.width as i64, 3])
        .flip([2])
        .permute([2, 0, 1])
        .unsqueeze(0)
        .to_kind(Kind::Float)
        / 255.0;
    Ok(tensor)
}
