//! Per-frame alert decision and the actions fired when it holds.
//!
//! The predicates are pure functions of one frame's detector output. Sinks are
//! invoked through [`AlertDispatcher::fire`], which never blocks on a sink and
//! never propagates a sink failure to the stream loop.

use std::{
    collections::BTreeSet,
    path::PathBuf,
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use ml_core::{ClassLabels, DetectionResult, FaceVerdict, MaskState};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::vision::{mode::DetectionMode, telemetry};

/// Default restricted object classes, matched by label name.
pub const DEFAULT_RESTRICTED_CLASSES: [&str; 5] = ["knife", "gun", "pistol", "rifle", "firearm"];

/// Class ids whose presence raises a weapon alert.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestrictedClasses {
    ids: BTreeSet<i64>,
}

impl RestrictedClasses {
    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Resolve class names against the detector labels. Names the label set
    /// does not know are skipped.
    pub fn resolve<S: AsRef<str>>(names: &[S], labels: &ClassLabels) -> Self {
        let mut ids = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            match labels.id_of(name) {
                Some(id) => {
                    ids.insert(id);
                }
                None => debug!("restricted class {name:?} is not in the label set; ignoring"),
            }
        }
        Self { ids }
    }

    pub fn contains(&self, class_id: i64) -> bool {
        self.ids.contains(&class_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.iter().copied()
    }
}

pub fn weapon_alert(result: &DetectionResult, restricted: &RestrictedClasses) -> bool {
    result
        .iter()
        .any(|detection| restricted.contains(detection.class_id))
}

pub fn mask_alert(faces: &[FaceVerdict]) -> bool {
    faces.iter().any(|face| face.state == MaskState::NoMask)
}

pub fn combined_alert(weapon: bool, mask: bool) -> bool {
    weapon || mask
}

/// What triggered an alert on a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    RestrictedObject,
    NoMask,
}

#[derive(Clone, Debug, Serialize)]
pub struct AlertEvent {
    pub mode: DetectionMode,
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub reasons: Vec<AlertReason>,
}

/// An action taken when a frame raises an alert.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    /// Start the action. Must return without waiting for it to complete.
    fn notify(&self, event: &AlertEvent) -> Result<()>;
}

/// Plays an audio file through an external player process.
pub struct SoundAlert {
    player: String,
    sound: PathBuf,
}

impl SoundAlert {
    pub fn new(player: impl Into<String>, sound: impl Into<PathBuf>) -> Self {
        Self {
            player: player.into(),
            sound: sound.into(),
        }
    }
}

impl AlertSink for SoundAlert {
    fn name(&self) -> &str {
        "sound"
    }

    fn notify(&self, _event: &AlertEvent) -> Result<()> {
        let mut parts = self.player.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("alert player command is empty"))?
            .to_string();
        let args: Vec<String> = parts.map(str::to_string).collect();
        let sound = self.sound.clone();

        telemetry::spawn_thread("vision-alert-sound", move || {
            let status = Command::new(&program)
                .args(&args)
                .arg(&sound)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!("alert player {program} exited with {status}");
                    metrics::counter!("vision_alert_sink_failures_total", "sink" => "sound")
                        .increment(1);
                }
                Err(err) => {
                    warn!("failed to run alert player {program}: {err}");
                    metrics::counter!("vision_alert_sink_failures_total", "sink" => "sound")
                        .increment(1);
                }
            }
        })
        .context("failed to spawn alert sound thread")?;
        Ok(())
    }
}

/// Publishes alert events to subscribers such as the `/alert_events` stream.
pub struct BroadcastAlert {
    tx: broadcast::Sender<AlertEvent>,
}

impl BroadcastAlert {
    pub fn new(tx: broadcast::Sender<AlertEvent>) -> Self {
        Self { tx }
    }
}

impl AlertSink for BroadcastAlert {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn notify(&self, event: &AlertEvent) -> Result<()> {
        // No subscribers is the normal state when no page is open.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Suppresses notifications to the inner sink within `cooldown` of the last
/// one it let through.
pub struct Cooldown<S> {
    inner: S,
    cooldown: Duration,
    last: Mutex<Option<Instant>>,
}

impl<S> Cooldown<S> {
    pub fn new(inner: S, cooldown: Duration) -> Self {
        Self {
            inner,
            cooldown,
            last: Mutex::new(None),
        }
    }
}

impl<S: AlertSink> AlertSink for Cooldown<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn notify(&self, event: &AlertEvent) -> Result<()> {
        {
            let mut last = self
                .last
                .lock()
                .map_err(|_| anyhow!("cooldown state poisoned"))?;
            let now = Instant::now();
            if last.is_some_and(|at| now.duration_since(at) < self.cooldown) {
                return Ok(());
            }
            *last = Some(now);
        }
        self.inner.notify(event)
    }
}

#[derive(Clone, Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }

    pub fn fire(&self, event: &AlertEvent) {
        metrics::counter!("vision_alerts_total", "mode" => event.mode.label()).increment(1);
        for sink in &self.sinks {
            if let Err(err) = sink.notify(event) {
                warn!("alert sink {} failed: {err:#}", sink.name());
                metrics::counter!("vision_alert_sink_failures_total", "sink" => sink.name().to_string())
                    .increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ml_core::Detection;

    use super::*;

    fn detection(class_id: i64) -> Detection {
        Detection {
            bbox_xywh: [0.0, 0.0, 10.0, 10.0],
            score: 0.9,
            class_id,
        }
    }

    fn face(state: MaskState) -> FaceVerdict {
        FaceVerdict {
            bbox_xywh: [0.0, 0.0, 10.0, 10.0],
            state,
            confidence: 0.8,
        }
    }

    fn event() -> AlertEvent {
        AlertEvent {
            mode: DetectionMode::Weapons,
            sequence: 1,
            timestamp_ms: 0,
            reasons: vec![AlertReason::RestrictedObject],
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl AlertSink for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn notify(&self, _event: &AlertEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl AlertSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn notify(&self, _event: &AlertEvent) -> Result<()> {
            Err(anyhow!("speaker unplugged"))
        }
    }

    #[test]
    fn weapon_alert_requires_a_restricted_class() {
        let restricted = RestrictedClasses::from_ids([43]);
        let benign = DetectionResult::new(vec![detection(0), detection(56)]);
        let armed = DetectionResult::new(vec![detection(0), detection(43)]);

        assert!(!weapon_alert(&benign, &restricted));
        assert!(weapon_alert(&armed, &restricted));
        assert!(!weapon_alert(&DetectionResult::default(), &restricted));
        assert!(!weapon_alert(&armed, &RestrictedClasses::default()));
    }

    #[test]
    fn mask_alert_fires_on_any_uncovered_face() {
        assert!(!mask_alert(&[]));
        assert!(!mask_alert(&[face(MaskState::Mask), face(MaskState::Mask)]));
        assert!(mask_alert(&[face(MaskState::Mask), face(MaskState::NoMask)]));
    }

    #[test]
    fn predicates_are_pure() {
        let restricted = RestrictedClasses::from_ids([43]);
        let armed = DetectionResult::new(vec![detection(43)]);
        let faces = [face(MaskState::NoMask)];
        for _ in 0..3 {
            assert!(weapon_alert(&armed, &restricted));
            assert!(mask_alert(&faces));
        }
        assert!(!weapon_alert(&DetectionResult::default(), &restricted));
    }

    #[test]
    fn combined_alert_is_or() {
        assert!(!combined_alert(false, false));
        assert!(combined_alert(true, false));
        assert!(combined_alert(false, true));
        assert!(combined_alert(true, true));
    }

    #[test]
    fn restricted_names_resolve_against_labels() {
        let labels = ClassLabels::coco();
        let restricted = RestrictedClasses::resolve(&["Knife", "gun", "scissors"], &labels);
        assert_eq!(restricted.ids().collect::<Vec<_>>(), vec![43, 76]);
        assert!(RestrictedClasses::resolve(&DEFAULT_RESTRICTED_CLASSES, &labels).contains(43));
    }

    #[test]
    fn dispatcher_survives_failing_sinks() {
        let counting = Arc::new(Counting::default());
        let dispatcher = AlertDispatcher::new()
            .with_sink(Arc::new(Failing))
            .with_sink(counting.clone());

        dispatcher.fire(&event());
        dispatcher.fire(&event());
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.sink_names(), vec!["failing", "counting"]);
    }

    #[test]
    fn cooldown_throttles_the_inner_sink() {
        let cooled = Cooldown::new(Counting::default(), Duration::from_secs(60));
        cooled.notify(&event()).unwrap();
        cooled.notify(&event()).unwrap();
        assert_eq!(cooled.inner.0.load(Ordering::SeqCst), 1);

        let open = Cooldown::new(Counting::default(), Duration::ZERO);
        open.notify(&event()).unwrap();
        open.notify(&event()).unwrap();
        assert_eq!(open.inner.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn broadcast_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(4);
        let sink = BroadcastAlert::new(tx);
        sink.notify(&event()).unwrap();
        let received = rx.try_recv().unwrap();
        assert_eq!(received.sequence, 1);
        assert_eq!(received.reasons, vec![AlertReason::RestrictedObject]);
    }
}
