//! Configuration parsing for the detection service.
//!
//! CLI arguments are collected by clap into `*Args` structs and validated into
//! the canonical config types with `TryFrom`, so downstream code never sees
//! raw flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use video_ingest::SourceOptions;

use crate::vision::{alert::DEFAULT_RESTRICTED_CLASSES, controller::CameraSources, mode::DetectionMode};

const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_SOURCE: &str = "0";

/// Frame source flags shared by `serve` and `snapshot`.
#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Camera URI used by every slot unless overridden (device index,
    /// /dev/videoN, rtsp://, file path or pattern://).
    #[arg(long = "source", value_name = "URI", default_value = DEFAULT_SOURCE)]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: i32,
    /// How long to wait for a camera's first frame.
    #[arg(long = "open-timeout-ms", value_name = "MS", default_value_t = 5000)]
    pub open_timeout_ms: u64,
    /// How long a single frame read may block.
    #[arg(long = "read-timeout-ms", value_name = "MS", default_value_t = 2000)]
    pub read_timeout_ms: u64,
    /// Decode file sources as fast as possible instead of at their frame rate.
    #[arg(long = "no-realtime", action = clap::ArgAction::SetTrue)]
    pub no_realtime: bool,
}

/// Detector and overlay flags shared by `serve` and `snapshot`.
#[derive(Debug, Args)]
pub struct DetectorArgs {
    /// TorchScript object detector (YOLO-style output).
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// TorchScript face detector used by the mask classifier.
    #[arg(long = "face-model", value_name = "PATH", requires = "mask_model")]
    pub face_model: Option<PathBuf>,
    /// TorchScript mask/no-mask crop classifier.
    #[arg(long = "mask-model", value_name = "PATH", requires = "face_model")]
    pub mask_model: Option<PathBuf>,
    /// Square detector input size in pixels.
    #[arg(long = "detector-size", value_name = "PX", default_value_t = 640)]
    pub detector_size: i64,
    /// Minimum detection confidence.
    #[arg(long = "confidence", value_name = "0-1", default_value_t = 0.5)]
    pub confidence: f32,
    /// IoU threshold for non-maximum suppression.
    #[arg(long = "iou", value_name = "0-1", default_value_t = 0.4)]
    pub iou: f32,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Class names file, one label per line (COCO when omitted).
    #[arg(long = "labels", value_name = "PATH")]
    pub labels: Option<PathBuf>,
    /// Class names that raise a weapon alert.
    #[arg(
        long = "restricted-class",
        value_name = "NAME",
        value_delimiter = ',',
        default_values = DEFAULT_RESTRICTED_CLASSES
    )]
    pub restricted_classes: Vec<String>,
    /// Class name kept by full-body mode.
    #[arg(long = "person-class", value_name = "NAME", default_value = "person")]
    pub person_class: String,
    /// JPEG quality (1-100). The encoder default is used when omitted.
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
}

/// Logging flags shared by `serve` and `snapshot`.
#[derive(Debug, Args)]
pub struct TelemetryArgs {
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Write span timings as a Chrome trace (open in chrome://tracing or Perfetto).
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

/// Flags of the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address the HTTP server listens on.
    #[arg(long = "bind", value_name = "ADDR", default_value = DEFAULT_BIND)]
    pub bind: String,
    /// Source for the weapon camera slot.
    #[arg(long = "weapon-source", value_name = "URI")]
    pub weapon_source: Option<String>,
    /// Source for the mask camera slot.
    #[arg(long = "mask-source", value_name = "URI")]
    pub mask_source: Option<String>,
    /// Source for the full-body camera slot.
    #[arg(long = "body-source", value_name = "URI")]
    pub body_source: Option<String>,
    /// Sound file played on alert frames.
    #[arg(long = "alert-sound", value_name = "PATH")]
    pub alert_sound: Option<PathBuf>,
    /// Player command used for the alert sound; the file path is appended.
    #[arg(long = "alert-player", value_name = "CMD", default_value = "aplay -q")]
    pub alert_player: String,
    /// Minimum gap between two alert sounds. Every alert frame plays when
    /// omitted.
    #[arg(long = "alert-cooldown-ms", value_name = "MS")]
    pub alert_cooldown_ms: Option<u64>,
    /// Expose Prometheus metrics on /metrics.
    #[arg(long = "metrics", action = clap::ArgAction::SetTrue)]
    pub metrics: bool,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
    #[command(flatten)]
    pub capture: CaptureArgs,
    #[command(flatten)]
    pub detector: DetectorArgs,
}

/// Flags of the `snapshot` subcommand.
#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Detection mode to run (weapons, masks, weapons_and_masks, full_body).
    #[arg(long = "mode", value_name = "MODE", default_value = "weapons")]
    pub mode: String,
    /// Where to write the annotated JPEG.
    #[arg(long = "output", value_name = "PATH", default_value = "snapshot.jpg")]
    pub output: PathBuf,
    /// Frames to skip before the one that is kept (lets exposure settle).
    #[arg(long = "skip", value_name = "N", default_value_t = 0)]
    pub skip: usize,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
    #[command(flatten)]
    pub capture: CaptureArgs,
    #[command(flatten)]
    pub detector: DetectorArgs,
}

#[derive(Clone, Debug)]
/// Detector backend settings.
pub struct ModelOptions {
    pub object_model: Option<PathBuf>,
    /// Face detector and mask classifier, loaded together.
    pub mask_models: Option<(PathBuf, PathBuf)>,
    pub input_size: i64,
    pub confidence: f32,
    pub iou: f32,
    pub use_cpu: bool,
}

#[derive(Clone, Debug)]
/// Detection and overlay settings shared by every mode.
pub struct DetectionOptions {
    pub models: ModelOptions,
    pub labels_path: Option<PathBuf>,
    pub restricted_classes: Vec<String>,
    pub person_class: String,
    pub jpeg_quality: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Alert action settings.
pub struct AlertOptions {
    pub sound: Option<PathBuf>,
    pub player: String,
    pub cooldown: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Subscriber settings applied before a command runs.
pub struct TelemetryOptions {
    pub verbose: bool,
    pub chrome_trace: Option<PathBuf>,
}

#[derive(Clone, Debug)]
/// Canonical configuration of the `serve` command.
pub struct VisionConfig {
    pub bind: SocketAddr,
    pub sources: CameraSources,
    pub capture: SourceOptions,
    pub detection: DetectionOptions,
    pub alerts: AlertOptions,
    pub metrics: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug)]
/// Canonical configuration of the `snapshot` command.
pub struct SnapshotConfig {
    pub mode: DetectionMode,
    pub source: String,
    pub output: PathBuf,
    pub skip: usize,
    pub capture: SourceOptions,
    pub detection: DetectionOptions,
    pub telemetry: TelemetryOptions,
}

impl From<TelemetryArgs> for TelemetryOptions {
    fn from(args: TelemetryArgs) -> Self {
        Self {
            verbose: args.verbose,
            chrome_trace: args.chrome_trace,
        }
    }
}

impl TryFrom<CaptureArgs> for SourceOptions {
    type Error = anyhow::Error;

    fn try_from(args: CaptureArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        if args.open_timeout_ms == 0 || args.read_timeout_ms == 0 {
            bail!("--open-timeout-ms and --read-timeout-ms must be greater than zero");
        }
        Ok(SourceOptions {
            target_size: (args.width, args.height),
            open_timeout: Duration::from_millis(args.open_timeout_ms),
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            realtime_files: !args.no_realtime,
        })
    }
}

impl TryFrom<DetectorArgs> for DetectionOptions {
    type Error = anyhow::Error;

    fn try_from(args: DetectorArgs) -> Result<Self> {
        if args.detector_size <= 0 || args.detector_size % 32 != 0 {
            bail!("--detector-size must be a positive multiple of 32");
        }
        if !(0.0..=1.0).contains(&args.confidence) {
            bail!("--confidence must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&args.iou) {
            bail!("--iou must be between 0 and 1");
        }
        if let Some(quality) = args.jpeg_quality {
            if !(1..=100).contains(&quality) {
                bail!("--jpeg-quality must be an integer between 1 and 100");
            }
        }

        let mask_models = match (args.face_model, args.mask_model) {
            (Some(face), Some(mask)) => Some((face, mask)),
            (None, None) => None,
            _ => bail!("--face-model and --mask-model must be given together"),
        };

        let restricted_classes: Vec<String> = args
            .restricted_classes
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(Self {
            models: ModelOptions {
                object_model: args.model,
                mask_models,
                input_size: args.detector_size,
                confidence: args.confidence,
                iou: args.iou,
                use_cpu: args.use_cpu,
            },
            labels_path: args.labels,
            restricted_classes,
            person_class: args.person_class,
            jpeg_quality: args.jpeg_quality,
        })
    }
}

impl TryFrom<ServeArgs> for VisionConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        let bind = args
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("--bind {:?} is not a socket address", args.bind))?;

        if args.alert_player.split_whitespace().next().is_none() {
            bail!("--alert-player must name a program");
        }
        let cooldown = match args.alert_cooldown_ms {
            Some(0) => bail!("--alert-cooldown-ms must be greater than zero"),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let fallback = args.capture.source.clone();
        let sources = CameraSources {
            weapon: args.weapon_source.unwrap_or_else(|| fallback.clone()),
            mask: args.mask_source.unwrap_or_else(|| fallback.clone()),
            body: args.body_source.unwrap_or(fallback),
        };

        Ok(Self {
            bind,
            sources,
            capture: args.capture.try_into()?,
            detection: args.detector.try_into()?,
            alerts: AlertOptions {
                sound: args.alert_sound,
                player: args.alert_player,
                cooldown,
            },
            metrics: args.metrics,
            telemetry: args.telemetry.into(),
        })
    }
}

impl TryFrom<SnapshotArgs> for SnapshotConfig {
    type Error = anyhow::Error;

    fn try_from(args: SnapshotArgs) -> Result<Self> {
        let mode = DetectionMode::from_label(&args.mode)
            .filter(|mode| *mode != DetectionMode::Inactive)
            .ok_or_else(|| {
                anyhow!(
                    "unknown mode {:?}; expected one of weapons, masks, weapons_and_masks, full_body",
                    args.mode
                )
            })?;

        Ok(Self {
            mode,
            source: args.capture.source.clone(),
            output: args.output,
            skip: args.skip,
            capture: args.capture.try_into()?,
            detection: args.detector.try_into()?,
            telemetry: args.telemetry.into(),
        })
    }
}
