use std::path::Path;

use anyhow::{Result, bail};
use tch::{self, Device, Kind, Tensor};
use video_ingest::Frame;

use crate::{
    detection::{FaceVerdict, MaskClassifier, MaskState, ObjectDetector},
    detector::{TorchDetector, frame_to_tensor},
};

/// Two-stage mask classifier: a TorchScript face detector followed by a
/// TorchScript crop classifier producing `[mask, no_mask]` logits.
pub struct TorchMaskClassifier {
    faces: TorchDetector,
    classifier: tch::CModule,
    device: Device,
    crop_size: i64,
}

impl TorchMaskClassifier {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        face_model: P,
        mask_model: Q,
        device: Device,
        face_input_size: (i64, i64),
    ) -> Result<Self> {
        let faces = TorchDetector::new(face_model, device, face_input_size)?;
        let mut classifier = tch::CModule::load_on_device(mask_model, device)?;
        classifier.set_eval();
        Ok(Self {
            faces,
            classifier,
            device,
            crop_size: 224,
        })
    }

    pub fn with_face_confidence(mut self, confidence: f32) -> Self {
        self.faces = self.faces.with_confidence_threshold(confidence);
        self
    }

    fn classify_crop(&self, crop: &Tensor) -> Result<(MaskState, f32)> {
        let resized = crop.upsample_bilinear2d([self.crop_size, self.crop_size], false, None, None);
        let logits = tch::no_grad(|| self.classifier.forward_ts(&[resized]))?;
        let probs: Vec<f32> = Vec::<f32>::try_from(
            &logits
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .softmax(-1, Kind::Float)
                .view([-1]),
        )?;
        if probs.len() < 2 {
            bail!("mask classifier returned {} scores, expected 2", probs.len());
        }
        if probs[1] > probs[0] {
            Ok((MaskState::NoMask, probs[1]))
        } else {
            Ok((MaskState::Mask, probs[0]))
        }
    }
}

impl MaskClassifier for TorchMaskClassifier {
    fn name(&self) -> &str {
        "torchscript-mask"
    }

    fn classify(&mut self, frame: &Frame) -> Result<Vec<FaceVerdict>> {
        let faces = self.faces.detect(frame)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let full = frame_to_tensor(frame, self.device)?;
        let (frame_w, frame_h) = (frame.width as i64, frame.height as i64);
        let mut verdicts = Vec::with_capacity(faces.len());
        for face in faces.iter() {
            let [x, y, w, h] = face.bbox_xywh;
            let left = (x.floor() as i64).clamp(0, frame_w - 1);
            let top = (y.floor() as i64).clamp(0, frame_h - 1);
            let right = ((x + w).ceil() as i64).clamp(left + 1, frame_w);
            let bottom = ((y + h).ceil() as i64).clamp(top + 1, frame_h);

            let crop = full
                .narrow(2, top, bottom - top)
                .narrow(3, left, right - left);
            let (state, confidence) = self.classify_crop(&crop)?;
            verdicts.push(FaceVerdict {
                bbox_xywh: face.bbox_xywh,
                state,
                confidence,
            });
        }
        Ok(verdicts)
    }
}
