//! One-shot capture: run a single frame through a detection mode and write
//! the annotated JPEG to disk.

use std::fs;

use anyhow::{Context, Result, anyhow};
use tracing::info;
use video_ingest::{FrameSource, open_source};

use crate::vision::{
    config::SnapshotConfig, data::ProcessedFrame, detectors::build_processor,
    encoding::encode_jpeg, processing::FrameProcessor,
};

pub fn run_snapshot(config: SnapshotConfig) -> Result<()> {
    let processor = build_processor(&config.detection)?;
    let mut source = open_source(&config.source, &config.capture)
        .with_context(|| format!("failed to open {}", config.source))?;

    let processed = capture_one(&processor, source.as_mut(), &config)?;
    let jpeg = encode_jpeg(&processed.canvas, config.detection.jpeg_quality)?;
    fs::write(&config.output, &jpeg)
        .with_context(|| format!("failed to write {}", config.output.display()))?;

    info!(
        "wrote {} ({} bytes): {} objects, {} faces, alert={}",
        config.output.display(),
        jpeg.len(),
        processed.objects.len(),
        processed.faces.len(),
        processed.alert
    );
    Ok(())
}

fn capture_one(
    processor: &FrameProcessor,
    source: &mut dyn FrameSource,
    config: &SnapshotConfig,
) -> Result<ProcessedFrame> {
    let mut skipped = 0;
    loop {
        let frame = source
            .next_frame()?
            .ok_or_else(|| anyhow!("{} ended before a frame was captured", source.describe()))?;
        if skipped < config.skip {
            skipped += 1;
            continue;
        }
        return processor.process(config.mode, &frame, (skipped + 1) as u64);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use video_ingest::SourceOptions;

    use super::*;
    use crate::vision::{
        alert::DEFAULT_RESTRICTED_CLASSES,
        config::{DetectionOptions, ModelOptions, TelemetryOptions},
        mode::DetectionMode,
    };

    fn config(source: &str, output: PathBuf, skip: usize) -> SnapshotConfig {
        SnapshotConfig {
            mode: DetectionMode::FullBody,
            source: source.into(),
            output,
            skip,
            capture: SourceOptions {
                target_size: (48, 32),
                ..SourceOptions::default()
            },
            detection: DetectionOptions {
                models: ModelOptions {
                    object_model: None,
                    mask_models: None,
                    input_size: 640,
                    confidence: 0.5,
                    iou: 0.4,
                    use_cpu: true,
                },
                labels_path: None,
                restricted_classes: DEFAULT_RESTRICTED_CLASSES.map(String::from).to_vec(),
                person_class: "person".into(),
                jpeg_quality: Some(70),
            },
            telemetry: TelemetryOptions::default(),
        }
    }

    #[test]
    fn writes_an_annotated_jpeg_from_a_pattern_source() {
        let output = std::env::temp_dir().join(format!("snapshot-{}.jpg", std::process::id()));
        run_snapshot(config("pattern://bars?fps=200&frames=3", output.clone(), 1)).unwrap();

        let written = fs::read(&output).unwrap();
        let _ = fs::remove_file(&output);
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (48, 32));
    }

    #[test]
    fn exhausted_source_is_an_error() {
        let output = std::env::temp_dir().join("snapshot-never-written.jpg");
        let err = run_snapshot(config("pattern://bars?fps=200&frames=1", output.clone(), 5))
            .unwrap_err();
        assert!(err.to_string().contains("ended before a frame"));
        assert!(!output.exists());
    }
}
