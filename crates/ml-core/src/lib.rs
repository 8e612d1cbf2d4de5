//! Detector seams and backends for the detection stream.
//!
//! The pipeline only sees [`ObjectDetector`] and [`MaskClassifier`]. Real
//! backends run TorchScript models through `tch` and are compiled with the
//! `with-tch` feature; the stub backends keep the service usable without it.

pub mod detection;
pub mod labels;
pub mod stub;

#[cfg(feature = "with-tch")]
pub mod detector;
#[cfg(feature = "with-tch")]
pub mod mask;

pub use detection::{
    Detection, DetectionResult, FaceVerdict, MaskClassifier, MaskState, ObjectDetector,
    non_max_suppression,
};
pub use labels::{COCO_LABELS, ClassLabels};
pub use stub::{StubDetector, StubMaskClassifier};

#[cfg(feature = "with-tch")]
pub use detector::TorchDetector;
#[cfg(feature = "with-tch")]
pub use mask::TorchMaskClassifier;
#[cfg(feature = "with-tch")]
pub use tch;
