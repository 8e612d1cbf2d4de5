//! Stream loop driving one feed response.
//!
//! Each feed request gets its own worker thread running [`run_stream`]:
//! snapshot the controller, read a frame, process it, fire alerts, encode and
//! hand the multipart chunk to the HTTP response through a bounded channel.
//! The loop ends on stop, supersession, source exhaustion, detector failure
//! or client disconnect, and releases its camera on the way out.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use actix_web::web::Bytes;
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::vision::{
    alert::{AlertDispatcher, AlertEvent},
    controller::{ModeController, Snapshot, StreamLease},
    encoding::{encode_jpeg, multipart_chunk},
    processing::FrameProcessor,
    telemetry,
};

/// Chunks buffered between a stream worker and its HTTP response.
pub const DEFAULT_CHUNK_BUFFER: usize = 2;

/// Everything a stream worker needs, shared by all feeds.
pub struct StreamContext {
    pub controller: Arc<ModeController>,
    pub processor: Arc<FrameProcessor>,
    pub alerts: AlertDispatcher,
    pub jpeg_quality: Option<u8>,
    pub chunk_buffer: usize,
    active_streams: AtomicUsize,
}

impl StreamContext {
    pub fn new(
        controller: Arc<ModeController>,
        processor: Arc<FrameProcessor>,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            controller,
            processor,
            alerts,
            jpeg_quality: None,
            chunk_buffer: DEFAULT_CHUNK_BUFFER,
            active_streams: AtomicUsize::new(0),
        }
    }

    pub fn with_jpeg_quality(mut self, quality: Option<u8>) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }
}

/// Why a stream loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    Stopped,
    Superseded,
    SourceExhausted,
    DetectorFailed,
    EncodeFailed,
    ClientGone,
    ControllerFailed,
}

/// Start a worker thread for `lease` and return the receiving end of its
/// chunk channel.
pub fn spawn_stream(ctx: Arc<StreamContext>, lease: StreamLease) -> Result<mpsc::Receiver<Bytes>> {
    let (tx, rx) = mpsc::channel(ctx.chunk_buffer.max(1));
    let name = format!("vision-stream-{}", lease.epoch);
    telemetry::spawn_thread(name, move || {
        let active = ctx.active_streams.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("vision_active_streams").set(active as f64);

        run_stream(&ctx, lease, &tx);

        let active = ctx.active_streams.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("vision_active_streams").set(active as f64);
    })
    .context("failed to spawn stream worker")?;
    Ok(rx)
}

/// Run the frame loop for `lease` on the current thread until it ends.
///
/// Must not be called from inside an async runtime; chunks are handed over
/// with `blocking_send`.
pub fn run_stream(ctx: &StreamContext, lease: StreamLease, tx: &mpsc::Sender<Bytes>) -> StreamEnd {
    let span = tracing::info_span!("vision.stream", mode = %lease.mode, epoch = lease.epoch);
    let _guard = span.enter();
    info!("stream started on {} camera", lease.slot);

    let mut sequence: u64 = 0;
    let end = loop {
        let (mode, camera) = match ctx.controller.snapshot(&lease) {
            Ok(Snapshot::Active { mode, camera }) => (mode, camera),
            Ok(Snapshot::Inactive) => break StreamEnd::Stopped,
            Ok(Snapshot::Superseded) => break StreamEnd::Superseded,
            Err(err) => {
                error!("controller unavailable: {err}");
                break StreamEnd::ControllerFailed;
            }
        };

        let frame = match camera.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => break StreamEnd::SourceExhausted,
            Err(err) => {
                warn!("camera #{} read failed: {err}", camera.id());
                break StreamEnd::SourceExhausted;
            }
        };

        sequence += 1;
        let frame_span = tracing::debug_span!("frame", sequence);
        let _frame_guard = frame_span.enter();
        let iteration_start = Instant::now();

        let processed = match ctx.processor.process(mode, &frame, sequence) {
            Ok(processed) => processed,
            Err(err) => {
                error!("detection failed: {err:#}");
                break StreamEnd::DetectorFailed;
            }
        };

        let jpeg = match encode_jpeg(&processed.canvas, ctx.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                error!("{err:#}");
                break StreamEnd::EncodeFailed;
            }
        };

        if processed.alert {
            ctx.alerts.fire(&AlertEvent {
                mode,
                sequence,
                timestamp_ms: processed.timestamp_ms,
                reasons: processed.reasons.clone(),
            });
        }

        let chunk = multipart_chunk(&jpeg, sequence, processed.alert);
        if tx.blocking_send(chunk).is_err() {
            break StreamEnd::ClientGone;
        }

        metrics::counter!("vision_frames_streamed_total", "mode" => mode.label()).increment(1);
        metrics::histogram!("vision_stage_latency_seconds", "stage" => "frame")
            .record(iteration_start.elapsed().as_secs_f64());
    };

    ctx.controller.finish(&lease);
    match end {
        StreamEnd::DetectorFailed | StreamEnd::EncodeFailed | StreamEnd::ControllerFailed => {
            warn!("stream aborted ({end:?}) after {sequence} frame(s)")
        }
        _ => info!("stream ended ({end:?}) after {sequence} frame(s)"),
    }
    debug!("{} camera handle(s) still open", ctx.controller.open_handles());
    end
}
