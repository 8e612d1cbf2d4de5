//! Builds the shared detector backends and the frame processor from config.

use std::sync::Arc;

use anyhow::{Context, Result};
use ml_core::{ClassLabels, StubDetector, StubMaskClassifier};
use tracing::{info, warn};

use crate::vision::{
    alert::RestrictedClasses,
    config::{DetectionOptions, ModelOptions},
    processing::{Detectors, FrameProcessor},
};

pub fn load_labels(options: &DetectionOptions) -> Result<ClassLabels> {
    match &options.labels_path {
        Some(path) => {
            let labels = ClassLabels::load(path)
                .with_context(|| format!("failed to load labels from {}", path.display()))?;
            info!("loaded {} class labels from {}", labels.len(), path.display());
            Ok(labels)
        }
        None => Ok(ClassLabels::coco()),
    }
}

/// Load labels and detectors and assemble the processor every stream shares.
pub fn build_processor(options: &DetectionOptions) -> Result<FrameProcessor> {
    let labels = Arc::new(load_labels(options)?);
    let restricted = RestrictedClasses::resolve(&options.restricted_classes, &labels);
    info!(
        "restricted classes: {:?}",
        restricted
            .ids()
            .map(|id| labels.name(id).unwrap_or("?").to_string())
            .collect::<Vec<_>>()
    );
    let detectors = load_detectors(&options.models)?;
    Ok(FrameProcessor::new(
        detectors,
        labels,
        restricted,
        &options.person_class,
    ))
}

#[cfg(feature = "with-tch")]
pub fn load_detectors(options: &ModelOptions) -> Result<Detectors> {
    use std::sync::Mutex;

    use ml_core::{
        TorchDetector, TorchMaskClassifier,
        tch::{Cuda, Device},
    };

    use crate::vision::processing::{SharedMaskClassifier, SharedObjectDetector};

    let device = if options.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    if !options.use_cpu && !Cuda::is_available() {
        warn!("CUDA is not available; running detectors on the CPU");
    }
    let input_size = (options.input_size, options.input_size);

    let object: SharedObjectDetector = match &options.object_model {
        Some(path) => {
            let detector = TorchDetector::new(path, device, input_size)
                .with_context(|| format!("failed to load object detector {}", path.display()))?
                .with_confidence_threshold(options.confidence)
                .with_iou_threshold(options.iou);
            info!("object detector {} loaded on {device:?}", path.display());
            Arc::new(Mutex::new(detector))
        }
        None => {
            warn!("no --model given; object detection reports nothing");
            Arc::new(Mutex::new(StubDetector))
        }
    };

    let mask: SharedMaskClassifier = match &options.mask_models {
        Some((face, mask)) => {
            let classifier = TorchMaskClassifier::new(face, mask, device, input_size)
                .context("failed to load mask classifier")?
                .with_face_confidence(options.confidence);
            info!(
                "mask classifier loaded on {device:?} (faces {}, masks {})",
                face.display(),
                mask.display()
            );
            Arc::new(Mutex::new(classifier))
        }
        None => {
            warn!("no --face-model/--mask-model given; mask classification reports nothing");
            Arc::new(Mutex::new(StubMaskClassifier))
        }
    };

    Ok(Detectors { object, mask })
}

#[cfg(not(feature = "with-tch"))]
pub fn load_detectors(options: &ModelOptions) -> Result<Detectors> {
    if options.object_model.is_some() || options.mask_models.is_some() {
        warn!("built without the `with-tch` feature; model paths are ignored");
    } else {
        warn!("no detector backend compiled in; streams show the raw camera feed");
    }
    Ok(Detectors::new(StubDetector, StubMaskClassifier))
}
