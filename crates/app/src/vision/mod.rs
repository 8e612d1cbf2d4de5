//! Live detection service: camera capture, per-mode inference, annotation and
//! MJPEG delivery over HTTP.
//!
//! - `mode` / `controller`: the selected detection mode and the camera handles
//!   it owns.
//! - `processing`: runs detectors for a mode and draws the overlays.
//! - `pipeline`: the per-client capture → process → encode loop.
//! - `alert`: alert predicates and the sinks that act on them.
//! - `server`: Actix Web routes.
//! - `runtime` / `snapshot`: entry points for the `serve` and `snapshot`
//!   commands.

pub use config::{ServeArgs, SnapshotArgs, SnapshotConfig, VisionConfig};
pub use controller::{CameraSources, ModeController, SourceFactory};
pub use mode::{CameraSlot, DetectionMode};
pub use runtime::run;
pub use snapshot::run_snapshot;

pub mod alert;
mod annotation;
pub mod config;
pub mod controller;
pub mod data;
pub mod detectors;
pub mod encoding;
pub mod mode;
pub mod pipeline;
pub mod processing;
mod runtime;
pub mod server;
mod snapshot;
pub mod telemetry;

#[cfg(test)]
mod test_support;
