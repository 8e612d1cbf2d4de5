//! Service assembly: wires detectors, the mode controller, alert sinks and the
//! HTTP server together and runs them until the server exits.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use crate::vision::{
    alert::{AlertDispatcher, AlertEvent, BroadcastAlert, Cooldown, SoundAlert},
    config::{AlertOptions, VisionConfig},
    controller::{IngestSourceFactory, ModeController},
    detectors::build_processor,
    pipeline::StreamContext,
    server::{self, ServerState},
    telemetry,
};

/// Alert events buffered per `/alert_events` subscriber.
const ALERT_EVENT_CAPACITY: usize = 64;

/// Run the detection service with a ready-made configuration.
pub fn run(config: VisionConfig) -> Result<()> {
    let metrics = if config.metrics {
        Some(telemetry::init_metrics_recorder()?.clone())
    } else {
        None
    };

    let processor = Arc::new(build_processor(&config.detection)?);
    let factory = Arc::new(IngestSourceFactory::new(config.capture));
    let controller = Arc::new(ModeController::new(config.sources.clone(), factory));
    info!(
        "camera sources: weapon={} mask={} body={}",
        config.sources.weapon, config.sources.mask, config.sources.body
    );

    let (alert_tx, _) = broadcast::channel(ALERT_EVENT_CAPACITY);
    let alerts = build_alert_dispatcher(&config.alerts, alert_tx.clone());
    let stream = Arc::new(
        StreamContext::new(controller.clone(), processor, alerts)
            .with_jpeg_quality(config.detection.jpeg_quality),
    );

    let mut state = ServerState::new(stream, alert_tx);
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    let result = actix_web::rt::System::new().block_on(server::serve(config.bind, state));
    controller.stop();
    result
}

/// The SSE broadcast sink is always installed; the sound sink only when a
/// sound file is configured.
pub fn build_alert_dispatcher(
    options: &AlertOptions,
    events: broadcast::Sender<AlertEvent>,
) -> AlertDispatcher {
    let dispatcher = AlertDispatcher::new().with_sink(Arc::new(BroadcastAlert::new(events)));
    let Some(sound) = &options.sound else {
        info!("no --alert-sound given; alerts are only published to /alert_events");
        return dispatcher;
    };

    let player = SoundAlert::new(options.player.clone(), sound.clone());
    match options.cooldown {
        Some(cooldown) => {
            info!("alert sound throttled to one every {cooldown:?}");
            dispatcher.with_sink(Arc::new(Cooldown::new(player, cooldown)))
        }
        None => dispatcher.with_sink(Arc::new(player)),
    }
}
