//! Process-wide detection mode and camera handle arbitration.
//!
//! Mode changes and handle bookkeeping go through the single controller
//! mutex. Neither camera I/O nor opening and releasing a source ever happens
//! while it is held: stream workers take a [`Snapshot`] (mode + cloned
//! handle) under the lock, drop it, then read through the handle's own
//! mutex. Lock order is always controller → handle.
//!
//! Selecting the mode that is already streaming joins the open camera, so
//! several viewers share one handle. Selecting a different mode starts a new
//! epoch and releases every handle of the previous one; streams holding an
//! older lease observe `Superseded` on their next iteration.

use std::{
    collections::HashMap,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, info, warn};
use video_ingest::{CaptureError, Frame, FrameSource, SourceOptions};

use crate::vision::mode::{CameraSlot, DetectionMode};

/// Opens frame sources for camera slots.
pub trait SourceFactory: Send + Sync {
    fn open(&self, slot: CameraSlot, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Production factory backed by `video_ingest::open_source`.
pub struct IngestSourceFactory {
    options: SourceOptions,
}

impl IngestSourceFactory {
    pub fn new(options: SourceOptions) -> Self {
        Self { options }
    }
}

impl SourceFactory for IngestSourceFactory {
    fn open(&self, slot: CameraSlot, uri: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        debug!("opening {slot} camera from {uri}");
        video_ingest::open_source(uri, &self.options)
    }
}

/// Source URI per camera slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraSources {
    pub weapon: String,
    pub mask: String,
    pub body: String,
}

impl CameraSources {
    /// Every slot reads the same source.
    pub fn shared(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            weapon: uri.clone(),
            mask: uri.clone(),
            body: uri,
        }
    }

    pub fn uri(&self, slot: CameraSlot) -> &str {
        match slot {
            CameraSlot::Weapon => &self.weapon,
            CameraSlot::Mask => &self.mask,
            CameraSlot::Body => &self.body,
        }
    }
}

/// Open camera. Clones share the same underlying source and take turns
/// reading from it; once released every clone reads end-of-stream.
#[derive(Clone)]
pub struct CameraHandle {
    id: u64,
    open: Arc<AtomicBool>,
    source: Arc<Mutex<Option<Box<dyn FrameSource>>>>,
}

impl CameraHandle {
    fn new(id: u64, source: Box<dyn FrameSource>) -> Self {
        Self {
            id,
            open: Arc::new(AtomicBool::new(true)),
            source: Arc::new(Mutex::new(Some(source))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read the next frame. A released handle behaves like an exhausted source.
    pub fn read(&self) -> Result<Option<Frame>, CaptureError> {
        let mut guard = self
            .source
            .lock()
            .map_err(|_| CaptureError::Other(anyhow!("camera handle #{} poisoned", self.id)))?;
        match guard.as_mut() {
            Some(source) => source.next_frame(),
            None => Ok(None),
        }
    }

    /// Drop the underlying source, waiting for an in-flight read to finish.
    /// Returns false when it was already released.
    pub fn release(&self) -> bool {
        self.open.store(false, Ordering::SeqCst);
        let mut guard = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take().is_some()
    }

    /// Never blocks, even while another thread is reading.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn release_handles(handles: Vec<CameraHandle>) -> usize {
    handles.iter().filter(|handle| handle.release()).count()
}

/// Ticket handed to a stream when its feed is selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamLease {
    pub epoch: u64,
    pub mode: DetectionMode,
    pub slot: CameraSlot,
}

/// Consistent view of controller state for one pipeline iteration.
pub enum Snapshot {
    Active {
        mode: DetectionMode,
        camera: CameraHandle,
    },
    Inactive,
    Superseded,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("mode {mode} does not stream from a camera")]
    NoCamera { mode: DetectionMode },
    #[error("{slot} camera {uri:?} is unavailable")]
    SourceUnavailable {
        slot: CameraSlot,
        uri: String,
        #[source]
        source: CaptureError,
    },
    #[error("{mode} selection was replaced before its camera opened")]
    Superseded { mode: DetectionMode },
    #[error("mode controller lock poisoned")]
    Poisoned,
}

#[derive(Default)]
struct ControllerState {
    mode: DetectionMode,
    epoch: u64,
    cameras: HashMap<CameraSlot, CameraHandle>,
    /// Leases of the current epoch whose streams have not finished.
    viewers: usize,
    /// Epoch whose camera is being opened outside the lock.
    opening: Option<u64>,
}

impl ControllerState {
    fn opening_current(&self) -> bool {
        self.opening == Some(self.epoch)
    }

    /// Start a new epoch and hand back the previous epoch's handles for
    /// release outside the lock.
    fn advance(&mut self, mode: DetectionMode) -> Vec<CameraHandle> {
        self.epoch = self.epoch.wrapping_add(1);
        self.mode = mode;
        self.viewers = 0;
        self.cameras.drain().map(|(_, handle)| handle).collect()
    }

    fn open_handles(&self) -> usize {
        self.cameras.values().filter(|handle| handle.is_open()).count()
    }
}

pub struct ModeController {
    state: Mutex<ControllerState>,
    /// Signalled whenever an in-flight open completes or is abandoned.
    opened: Condvar,
    sources: CameraSources,
    factory: Arc<dyn SourceFactory>,
    next_handle_id: AtomicU64,
}

impl ModeController {
    pub fn new(sources: CameraSources, factory: Arc<dyn SourceFactory>) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            opened: Condvar::new(),
            sources,
            factory,
            next_handle_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ControllerState>, ControllerError> {
        self.state.lock().map_err(|_| ControllerError::Poisoned)
    }

    /// Activate `mode` and return a lease for one stream.
    ///
    /// If `mode` is already streaming the lease joins its camera. Otherwise
    /// the previous selection's handles are released and the mode's camera is
    /// opened; on failure the mode falls back to `Inactive` and nothing stays
    /// open. Waits for another selection's open that is still in flight.
    pub fn select(&self, mode: DetectionMode) -> Result<StreamLease, ControllerError> {
        let slot = mode
            .camera_slot()
            .ok_or(ControllerError::NoCamera { mode })?;
        let uri = self.sources.uri(slot).to_string();

        let mut state = self.lock()?;
        while state.opening_current() {
            state = self
                .opened
                .wait(state)
                .map_err(|_| ControllerError::Poisoned)?;
        }

        if state.mode == mode && state.cameras.get(&slot).is_some_and(CameraHandle::is_open) {
            state.viewers += 1;
            debug!("joined {mode} stream ({} viewer(s))", state.viewers);
            return Ok(StreamLease {
                epoch: state.epoch,
                mode,
                slot,
            });
        }

        let previous = state.advance(mode);
        let epoch = state.epoch;
        state.opening = Some(epoch);
        drop(state);

        let released = release_handles(previous);
        if released > 0 {
            debug!("released {released} camera handle(s) from the previous selection");
        }
        let opened = self.factory.open(slot, &uri);

        let mut state = self.lock()?;
        if state.opening == Some(epoch) {
            state.opening = None;
        }
        self.opened.notify_all();
        let current = state.epoch == epoch;

        match opened {
            Ok(source) if current => {
                let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
                state.cameras.insert(slot, CameraHandle::new(id, source));
                state.viewers = 1;
                metrics::gauge!("vision_open_camera_handles").set(state.open_handles() as f64);
                info!("detection mode set to {mode} ({slot} camera #{id} from {uri})");
                Ok(StreamLease { epoch, mode, slot })
            }
            Ok(source) => {
                drop(state);
                drop(source);
                info!("{mode} selection was replaced while {uri} was opening");
                Err(ControllerError::Superseded { mode })
            }
            Err(err) => {
                if current {
                    state.mode = DetectionMode::Inactive;
                    metrics::gauge!("vision_open_camera_handles").set(0.0);
                }
                warn!("failed to open {slot} camera {uri}: {err}");
                Err(ControllerError::SourceUnavailable {
                    slot,
                    uri,
                    source: err,
                })
            }
        }
    }

    /// Deactivate detection and release every open handle. Idempotent.
    pub fn stop(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let was = state.mode;
        let handles = state.advance(DetectionMode::Inactive);
        drop(state);
        self.opened.notify_all();

        let released = release_handles(handles);
        metrics::gauge!("vision_open_camera_handles").set(0.0);
        info!("detection stopped (was {was}, released {released} camera handle(s))");
        released
    }

    /// Snapshot the mode and the lease's camera for one iteration.
    pub fn snapshot(&self, lease: &StreamLease) -> Result<Snapshot, ControllerError> {
        let state = self.lock()?;
        if state.mode == DetectionMode::Inactive {
            return Ok(Snapshot::Inactive);
        }
        if state.epoch != lease.epoch {
            return Ok(Snapshot::Superseded);
        }
        Ok(match state.cameras.get(&lease.slot) {
            Some(camera) => Snapshot::Active {
                mode: state.mode,
                camera: camera.clone(),
            },
            None => Snapshot::Superseded,
        })
    }

    /// Called when a lease's stream has ended. The camera is released once
    /// the last viewer of the current selection finishes; the mode is left
    /// as is.
    pub fn finish(&self, lease: &StreamLease) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.epoch != lease.epoch {
            return;
        }
        state.viewers = state.viewers.saturating_sub(1);
        if state.viewers > 0 {
            debug!("{} viewer(s) remain on the {} camera", state.viewers, lease.slot);
            return;
        }
        let handle = state.cameras.remove(&lease.slot);
        metrics::gauge!("vision_open_camera_handles").set(state.open_handles() as f64);
        drop(state);

        if let Some(handle) = handle {
            if handle.release() {
                debug!("released {} camera #{} after stream end", lease.slot, handle.id());
            }
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.state
            .lock()
            .map(|state| state.mode)
            .unwrap_or(DetectionMode::Inactive)
    }

    pub fn open_handles(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.open_handles())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::vision::test_support::FakeSourceFactory;

    fn wait_for_mode(controller: &ModeController, mode: DetectionMode) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.mode() != mode {
            assert!(Instant::now() < deadline, "mode never became {mode}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn controller(factory: Arc<FakeSourceFactory>) -> ModeController {
        ModeController::new(
            CameraSources {
                weapon: "0".into(),
                mask: "1".into(),
                body: "2".into(),
            },
            factory,
        )
    }

    #[test]
    fn selecting_a_new_mode_releases_the_previous_handle() {
        let factory = Arc::new(FakeSourceFactory::endless());
        let controller = controller(factory.clone());

        controller.select(DetectionMode::Weapons).unwrap();
        assert_eq!(controller.open_handles(), 1);
        controller.select(DetectionMode::Masks).unwrap();
        controller.select(DetectionMode::WeaponsAndMasks).unwrap();

        assert_eq!(controller.open_handles(), 1);
        assert_eq!(factory.opened(), 3);
        assert_eq!(factory.live(), 1);
        assert_eq!(factory.opened_uris(), vec!["0", "1", "0"]);
        assert_eq!(controller.mode(), DetectionMode::WeaponsAndMasks);
    }

    #[test]
    fn stop_is_idempotent() {
        let factory = Arc::new(FakeSourceFactory::endless());
        let controller = controller(factory.clone());

        assert_eq!(controller.stop(), 0);
        assert_eq!(controller.mode(), DetectionMode::Inactive);

        controller.select(DetectionMode::FullBody).unwrap();
        assert_eq!(controller.stop(), 1);
        assert_eq!(controller.stop(), 0);
        assert_eq!(controller.mode(), DetectionMode::Inactive);
        assert_eq!(controller.open_handles(), 0);
        assert_eq!(factory.live(), 0);
    }

    #[test]
    fn snapshot_reports_stop_and_supersession() {
        let controller = controller(Arc::new(FakeSourceFactory::endless()));

        let first = controller.select(DetectionMode::Weapons).unwrap();
        assert!(matches!(
            controller.snapshot(&first).unwrap(),
            Snapshot::Active {
                mode: DetectionMode::Weapons,
                ..
            }
        ));

        let second = controller.select(DetectionMode::Masks).unwrap();
        assert!(matches!(controller.snapshot(&first).unwrap(), Snapshot::Superseded));
        assert!(matches!(controller.snapshot(&second).unwrap(), Snapshot::Active { .. }));

        controller.stop();
        assert!(matches!(controller.snapshot(&second).unwrap(), Snapshot::Inactive));
    }

    #[test]
    fn released_handle_reads_end_of_stream() {
        let controller = controller(Arc::new(FakeSourceFactory::endless()));
        let lease = controller.select(DetectionMode::Weapons).unwrap();
        let Snapshot::Active { camera, .. } = controller.snapshot(&lease).unwrap() else {
            panic!("expected an active snapshot");
        };
        assert!(camera.read().unwrap().is_some());

        controller.stop();
        assert!(!camera.is_open());
        assert!(camera.read().unwrap().is_none());
        assert!(!camera.release());
    }

    #[test]
    fn open_failure_leaves_nothing_active() {
        let factory = Arc::new(FakeSourceFactory::endless());
        let controller = controller(factory.clone());
        controller.select(DetectionMode::Weapons).unwrap();

        factory.fail_next_open();
        let err = controller.select(DetectionMode::Masks).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::SourceUnavailable {
                slot: CameraSlot::Mask,
                ..
            }
        ));
        assert_eq!(controller.mode(), DetectionMode::Inactive);
        assert_eq!(controller.open_handles(), 0);
        assert_eq!(factory.live(), 0);
    }

    #[test]
    fn finish_only_releases_the_current_selection() {
        let factory = Arc::new(FakeSourceFactory::endless());
        let controller = controller(factory.clone());

        let old = controller.select(DetectionMode::Weapons).unwrap();
        let current = controller.select(DetectionMode::FullBody).unwrap();
        controller.finish(&old);
        assert_eq!(controller.open_handles(), 1);

        controller.finish(&current);
        assert_eq!(controller.open_handles(), 0);
        assert_eq!(controller.mode(), DetectionMode::FullBody);
    }

    #[test]
    fn inactive_mode_cannot_be_selected() {
        let controller = controller(Arc::new(FakeSourceFactory::endless()));
        assert!(matches!(
            controller.select(DetectionMode::Inactive),
            Err(ControllerError::NoCamera { .. })
        ));
    }

    #[test]
    fn reselecting_the_streaming_mode_shares_its_camera() {
        let factory = Arc::new(FakeSourceFactory::endless());
        let controller = controller(factory.clone());

        let first = controller.select(DetectionMode::Masks).unwrap();
        let second = controller.select(DetectionMode::Masks).unwrap();
        assert_eq!(first, second);
        assert_eq!(factory.opened(), 1);
        assert!(matches!(controller.snapshot(&first).unwrap(), Snapshot::Active { .. }));

        controller.finish(&first);
        assert_eq!(controller.open_handles(), 1);
        assert!(matches!(controller.snapshot(&second).unwrap(), Snapshot::Active { .. }));

        controller.finish(&second);
        assert_eq!(controller.open_handles(), 0);
        assert_eq!(factory.live(), 0);

        controller.select(DetectionMode::Masks).unwrap();
        assert_eq!(factory.opened(), 2);
    }

    #[test]
    fn status_reads_do_not_wait_for_a_slow_open() {
        let factory =
            Arc::new(FakeSourceFactory::endless().with_open_delay(Duration::from_millis(400)));
        let controller = Arc::new(controller(factory.clone()));
        let selecting = {
            let controller = controller.clone();
            thread::spawn(move || controller.select(DetectionMode::Masks))
        };
        wait_for_mode(&controller, DetectionMode::Masks);

        let started = Instant::now();
        assert_eq!(controller.open_handles(), 0);
        assert_eq!(controller.mode(), DetectionMode::Masks);
        assert!(started.elapsed() < Duration::from_millis(200));

        selecting.join().unwrap().unwrap();
        assert_eq!(controller.open_handles(), 1);
    }

    #[test]
    fn stop_during_a_slow_open_discards_the_camera() {
        let factory =
            Arc::new(FakeSourceFactory::endless().with_open_delay(Duration::from_millis(200)));
        let controller = Arc::new(controller(factory.clone()));
        let selecting = {
            let controller = controller.clone();
            thread::spawn(move || controller.select(DetectionMode::Weapons))
        };
        wait_for_mode(&controller, DetectionMode::Weapons);

        assert_eq!(controller.stop(), 0);
        let err = selecting.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Superseded {
                mode: DetectionMode::Weapons
            }
        ));
        assert_eq!(controller.mode(), DetectionMode::Inactive);
        assert_eq!(controller.open_handles(), 0);
        assert_eq!(factory.live(), 0);
    }

    #[test]
    fn concurrent_selects_of_one_mode_open_it_once() {
        let factory =
            Arc::new(FakeSourceFactory::endless().with_open_delay(Duration::from_millis(100)));
        let controller = Arc::new(controller(factory.clone()));

        let selecting: Vec<_> = (0..4)
            .map(|_| {
                let controller = controller.clone();
                thread::spawn(move || controller.select(DetectionMode::FullBody))
            })
            .collect();
        let leases: Vec<StreamLease> = selecting
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();

        assert!(leases.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(factory.opened(), 1);

        for lease in &leases[1..] {
            controller.finish(lease);
        }
        assert_eq!(factory.live(), 1);
        controller.finish(&leases[0]);
        assert_eq!(factory.live(), 0);
    }
}
