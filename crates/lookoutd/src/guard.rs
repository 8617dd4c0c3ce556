//! The guard task: single owner of the mode machine and the gallery.
//!
//! D-Bus handlers talk to it through [`GuardHandle`]. Each request runs to
//! completion before the next, so mode, gallery and camera session never
//! disagree. Transitions are applied to the engine here and then published
//! on a broadcast channel for the signal forwarder.

use crate::config::{Config, Disguise};
use crate::engine::{CaptureError, CycleStats, EngineEvent, EngineHandle, Purpose};
use crate::loader::ProviderState;
use crate::mode::{AlarmSource, ExitReason, Mode, ModeError, ModeEvent, ModeMachine, Transition};
use chrono::{DateTime, Utc};
use lookout_core::{EnrolledFace, FaceId, Gallery, GalleryError, ReadinessGate};
use lookout_hw::SessionInfo;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum GuardError {
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("no enrolled face with id {0}")]
    UnknownFace(FaceId),
    #[error("guard task exited")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub disguise: Disguise,
    pub match_threshold: f32,
    pub auto_clear: Option<Duration>,
}

impl From<&Config> for GuardSettings {
    fn from(config: &Config) -> Self {
        Self {
            disguise: config.disguise,
            match_threshold: config.match_threshold,
            auto_clear: config.auto_clear,
        }
    }
}

/// Mode-changing requests. All reply with the mode after the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOp {
    StartRegistering,
    StopRegistering,
    StartMonitoring,
    StopMonitoring,
    TogglePanic,
    ReportDetection,
    ExitAlarm,
    Cancel,
    ClearAlarm,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CameraState {
    Off,
    Starting,
    Active { device: String, width: u32, height: u32 },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmInfo {
    pub source: &'static str,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    pub id: FaceId,
    pub name: String,
    pub enrolled_at: DateTime<Utc>,
    pub thumbnail_bytes: usize,
}

impl From<&EnrolledFace> for FaceSummary {
    fn from(face: &EnrolledFace) -> Self {
        Self {
            id: face.id,
            name: face.display_name.clone(),
            enrolled_at: face.enrolled_at,
            thumbnail_bytes: face.thumbnail.len(),
        }
    }
}

/// Snapshot returned by `Status()`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub mode: Mode,
    pub label: &'static str,
    pub resume_mode: Option<Mode>,
    pub disguise: &'static str,
    pub camera: CameraState,
    pub provider: ProviderState,
    pub provider_ready: bool,
    pub gallery_size: usize,
    pub match_threshold: f32,
    pub host_visible: bool,
    pub last_alarm: Option<AlarmInfo>,
    pub detection: CycleStats,
}

type Reply<T> = oneshot::Sender<Result<T, GuardError>>;

enum GuardRequest {
    Mode(ModeOp, Reply<Mode>),
    Capture(String, Reply<FaceId>),
    ListFaces(Reply<Vec<FaceSummary>>),
    RemoveFace(FaceId, Reply<bool>),
    Thumbnail(FaceId, Reply<Vec<u8>>),
    SetVisible(bool, Reply<()>),
    Status(Reply<Status>),
    Shutdown(Reply<()>),
}

/// Clone-safe handle to the guard task.
#[derive(Clone)]
pub struct GuardHandle {
    tx: mpsc::Sender<GuardRequest>,
}

impl GuardHandle {
    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> GuardRequest) -> Result<T, GuardError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| GuardError::ChannelClosed)?;
        reply_rx.await.map_err(|_| GuardError::ChannelClosed)?
    }

    pub async fn mode_op(&self, op: ModeOp) -> Result<Mode, GuardError> {
        self.call(|reply| GuardRequest::Mode(op, reply)).await
    }

    /// Capture the single visible face and enroll it under `name`.
    pub async fn capture(&self, name: &str) -> Result<FaceId, GuardError> {
        let name = name.to_string();
        self.call(|reply| GuardRequest::Capture(name, reply)).await
    }

    pub async fn list_faces(&self) -> Result<Vec<FaceSummary>, GuardError> {
        self.call(GuardRequest::ListFaces).await
    }

    pub async fn remove_face(&self, id: FaceId) -> Result<bool, GuardError> {
        self.call(|reply| GuardRequest::RemoveFace(id, reply)).await
    }

    pub async fn thumbnail(&self, id: FaceId) -> Result<Vec<u8>, GuardError> {
        self.call(|reply| GuardRequest::Thumbnail(id, reply)).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<(), GuardError> {
        self.call(|reply| GuardRequest::SetVisible(visible, reply)).await
    }

    pub async fn status(&self) -> Result<Status, GuardError> {
        self.call(GuardRequest::Status).await
    }

    /// Release the camera and stop the engine thread.
    pub async fn shutdown(&self) -> Result<(), GuardError> {
        self.call(GuardRequest::Shutdown).await
    }
}

/// Everything the guard task needs from the rest of the daemon.
pub struct GuardParts {
    pub engine: EngineHandle,
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    pub stats: watch::Receiver<CycleStats>,
    pub provider: watch::Receiver<ProviderState>,
    pub gate: ReadinessGate,
}

/// Spawn the guard task. Subscribe to the returned sender for transitions.
pub fn spawn_guard(settings: GuardSettings, parts: GuardParts) -> (GuardHandle, broadcast::Sender<Transition>) {
    let (tx, rx) = mpsc::channel(16);
    let (events, _) = broadcast::channel(64);
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let guard = Guard {
        machine: ModeMachine::new(),
        gallery: Gallery::new(),
        settings,
        engine: parts.engine,
        engine_events: parts.engine_events,
        stats: parts.stats,
        provider: parts.provider,
        gate: parts.gate,
        session: 0,
        camera: CameraState::Off,
        visible: true,
        last_alarm: None,
        alarm_epoch: 0,
        timer_tx,
        timer_rx,
        events: events.clone(),
    };
    tokio::spawn(guard.run(rx));

    (GuardHandle { tx }, events)
}

struct Guard {
    machine: ModeMachine,
    gallery: Gallery,
    settings: GuardSettings,
    engine: EngineHandle,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    stats: watch::Receiver<CycleStats>,
    provider: watch::Receiver<ProviderState>,
    gate: ReadinessGate,
    /// Bumped on every camera open; engine events carry the value they saw.
    session: u64,
    camera: CameraState,
    visible: bool,
    last_alarm: Option<AlarmInfo>,
    /// Bumped on every alarm entry and exit; stale auto-clear timers carry an old value.
    alarm_epoch: u64,
    timer_tx: mpsc::UnboundedSender<u64>,
    timer_rx: mpsc::UnboundedReceiver<u64>,
    events: broadcast::Sender<Transition>,
}

impl Guard {
    async fn run(mut self, mut requests: mpsc::Receiver<GuardRequest>) {
        tracing::info!("guard task started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(GuardRequest::Shutdown(reply)) => {
                        self.release();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(request) => self.handle(request).await,
                    None => {
                        self.release();
                        break;
                    }
                },
                Some(event) = self.engine_events.recv() => self.on_engine_event(event),
                Some(epoch) = self.timer_rx.recv() => self.on_auto_clear(epoch),
            }
        }
        tracing::info!("guard task exiting");
    }

    fn release(&mut self) {
        self.engine.close();
        self.engine.shutdown();
        self.camera = CameraState::Off;
    }

    async fn handle(&mut self, request: GuardRequest) {
        match request {
            GuardRequest::Mode(op, reply) => {
                let _ = reply.send(self.mode_op(op));
            }
            GuardRequest::Capture(name, reply) => {
                let _ = reply.send(self.capture(name).await);
            }
            GuardRequest::ListFaces(reply) => {
                let _ = reply.send(Ok(self.gallery.list().iter().map(FaceSummary::from).collect()));
            }
            GuardRequest::RemoveFace(id, reply) => {
                let _ = reply.send(Ok(self.remove_face(id)));
            }
            GuardRequest::Thumbnail(id, reply) => {
                let result = self
                    .gallery
                    .get(&id)
                    .map(|face| face.thumbnail.clone())
                    .ok_or(GuardError::UnknownFace(id));
                let _ = reply.send(result);
            }
            GuardRequest::SetVisible(visible, reply) => {
                if self.visible != visible {
                    tracing::debug!(visible, "host visibility changed");
                }
                self.visible = visible;
                self.engine.set_visible(visible);
                let _ = reply.send(Ok(()));
            }
            GuardRequest::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
            // Handled by the run loop.
            GuardRequest::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn mode_op(&mut self, op: ModeOp) -> Result<Mode, GuardError> {
        let faces = self.gallery.len();
        let transition = match op {
            ModeOp::StartRegistering => self.machine.start_registering()?,
            ModeOp::StopRegistering => self.machine.stop_registering(),
            ModeOp::StartMonitoring => self.machine.start_monitoring(faces)?,
            ModeOp::StopMonitoring => self.machine.stop_monitoring(),
            ModeOp::TogglePanic => self.machine.toggle_alarm(faces),
            ModeOp::ReportDetection => self.machine.alarm(AlarmSource::External)?,
            ModeOp::ExitAlarm => self.machine.exit_alarm(ExitReason::Exit),
            ModeOp::Cancel => self.machine.exit_alarm(ExitReason::Cancel),
            ModeOp::ClearAlarm => self.machine.clear_alarm(ExitReason::Clear, faces)?,
        };

        let reentry = matches!(op, ModeOp::StartRegistering | ModeOp::StartMonitoring);
        if reentry && transition.is_noop() && matches!(self.camera, CameraState::Failed { .. }) {
            tracing::info!(mode = %self.machine.mode(), "retrying camera on mode re-entry");
            let purpose = match self.machine.mode() {
                Mode::Registering => Purpose::Registering,
                _ => Purpose::Monitoring,
            };
            self.open_camera(purpose);
            if purpose == Purpose::Monitoring {
                self.engine.arm(self.gallery.list().to_vec());
            }
        }

        self.apply(transition);
        Ok(self.machine.mode())
    }

    /// Drive the engine for `transition` and publish it.
    fn apply(&mut self, transition: Transition) {
        if transition.is_noop() {
            return;
        }
        if transition.from != transition.to {
            tracing::info!(
                from = %transition.from,
                to = %transition.to,
                label = transition.to.label(),
                "mode changed"
            );
        }

        for event in &transition.events {
            match *event {
                ModeEvent::RegisteringStarted => self.open_camera(Purpose::Registering),
                ModeEvent::MonitoringStarted => {
                    self.open_camera(Purpose::Monitoring);
                    self.engine.arm(self.gallery.list().to_vec());
                }
                ModeEvent::RegisteringStopped | ModeEvent::MonitoringStopped => {
                    self.engine.close();
                    self.camera = CameraState::Off;
                }
                ModeEvent::AlarmEntered(source) => {
                    self.engine.disarm();
                    self.alarm_epoch += 1;
                    self.last_alarm = Some(AlarmInfo {
                        source: source.as_str(),
                        at: Utc::now(),
                    });
                    tracing::info!(
                        source = source.as_str(),
                        disguise = %self.settings.disguise,
                        "alarm raised"
                    );
                    if transition.from == Mode::Monitoring {
                        self.schedule_auto_clear();
                    }
                }
                ModeEvent::AlarmExited(reason) => {
                    self.alarm_epoch += 1;
                    tracing::info!(reason = reason.as_str(), "alarm cleared");
                    if transition.to == Mode::Monitoring {
                        self.engine.arm(self.gallery.list().to_vec());
                    }
                }
            }
        }

        // Nobody listening is fine.
        let _ = self.events.send(transition);
    }

    fn open_camera(&mut self, purpose: Purpose) {
        self.session += 1;
        self.camera = CameraState::Starting;
        self.engine.open(self.session, purpose);
    }

    fn schedule_auto_clear(&self) {
        let Some(delay) = self.settings.auto_clear else {
            return;
        };
        let epoch = self.alarm_epoch;
        let timer = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer.send(epoch);
        });
    }

    fn on_auto_clear(&mut self, epoch: u64) {
        if epoch != self.alarm_epoch {
            tracing::debug!(epoch, current = self.alarm_epoch, "stale auto-clear timer");
            return;
        }
        match self.machine.clear_alarm(ExitReason::AutoClear, self.gallery.len()) {
            Ok(transition) => self.apply(transition),
            Err(e) => tracing::warn!(error = %e, "automatic clear skipped"),
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::CameraStarted { session, info } if session == self.session => {
                let SessionInfo { device, width, height } = info;
                self.camera = CameraState::Active { device, width, height };
            }
            EngineEvent::CameraFailed { session, error } if session == self.session => {
                tracing::warn!(session, error = %error, mode = %self.machine.mode(), "camera unavailable; mode stays inert");
                self.camera = CameraState::Failed {
                    error: error.to_string(),
                };
            }
            EngineEvent::Matched { session, result } if session == self.session => {
                if self.machine.mode() != Mode::Monitoring {
                    tracing::debug!(mode = %self.machine.mode(), "match outside monitoring ignored");
                    return;
                }
                tracing::info!(distance = result.best_distance, "enrolled face in view");
                match self.machine.alarm(AlarmSource::Detection) {
                    Ok(transition) => self.apply(transition),
                    Err(e) => tracing::warn!(error = %e, "detection alarm rejected"),
                }
            }
            stale => {
                tracing::warn!(current = self.session, event = ?stale, "stale engine event dropped");
            }
        }
    }

    async fn capture(&mut self, name: String) -> Result<FaceId, GuardError> {
        let mode = self.machine.mode();
        if mode != Mode::Registering {
            return Err(ModeError::NotAllowed {
                action: "capture a face",
                mode,
            }
            .into());
        }

        let shot = match self.engine.capture().await {
            Ok(shot) => shot,
            Err(e) => {
                tracing::info!(error = %e, "capture rejected");
                return Err(e.into());
            }
        };

        let name = match name.trim() {
            "" => format!("Face {}", self.gallery.len() + 1),
            trimmed => trimmed.to_string(),
        };
        let id = self
            .gallery
            .add(EnrolledFace::new(shot.embedding, shot.thumbnail, name))?;

        let transition = self.machine.stop_registering();
        self.apply(transition);
        Ok(id)
    }

    fn remove_face(&mut self, id: FaceId) -> bool {
        if self.gallery.remove(&id).is_none() {
            return false;
        }
        if self.machine.camera_wanted() {
            self.engine.update_gallery(self.gallery.list().to_vec());
        }
        if self.gallery.is_empty() && self.machine.mode() == Mode::Monitoring {
            tracing::warn!("gallery emptied while monitoring; nothing can match");
        }
        true
    }

    fn status(&self) -> Status {
        Status {
            version: env!("CARGO_PKG_VERSION"),
            mode: self.machine.mode(),
            label: self.machine.mode().label(),
            resume_mode: self.machine.resume_mode(),
            disguise: self.settings.disguise.as_str(),
            camera: self.camera.clone(),
            provider: self.provider.borrow().clone(),
            provider_ready: self.gate.is_ready(),
            gallery_size: self.gallery.len(),
            match_threshold: self.settings.match_threshold,
            host_visible: self.visible,
            last_alarm: self.last_alarm.clone(),
            detection: self.stats.borrow().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, LoopSettings};
    use crate::testing::{face_at, FakeCamera, ScriptedProvider};
    use lookout_core::{LoadedProvider, ProviderOrigin};
    use lookout_hw::CameraError;

    const WAIT: Duration = Duration::from_secs(2);

    struct Rig {
        guard: GuardHandle,
        transitions: broadcast::Receiver<Transition>,
        camera: FakeCamera,
        provider: ScriptedProvider,
    }

    fn rig_with(camera: FakeCamera, threshold: f32, auto_clear: Option<Duration>) -> Rig {
        let provider = ScriptedProvider::default();
        let gate = ReadinessGate::new();
        let (events_tx, engine_events) = mpsc::unbounded_channel();
        let settings = LoopSettings {
            poll_interval: Duration::from_millis(1),
            hidden_poll_interval: Duration::from_millis(1),
            throttle_when_hidden: false,
            match_threshold: threshold,
            capture_attempts: 3,
        };
        let (engine, stats) =
            spawn_engine(Box::new(camera.clone()), settings, gate.clone(), events_tx).unwrap();
        engine.install_provider(LoadedProvider {
            provider: Box::new(provider.clone()),
            origin: ProviderOrigin::Primary,
            source_name: "scripted".into(),
        });
        let (_, provider_state) = watch::channel(ProviderState::Loading);

        let (guard, events) = spawn_guard(
            GuardSettings {
                disguise: Disguise::Vscode,
                match_threshold: threshold,
                auto_clear,
            },
            GuardParts {
                engine,
                engine_events,
                stats,
                provider: provider_state,
                gate,
            },
        );
        Rig {
            guard,
            transitions: events.subscribe(),
            camera,
            provider,
        }
    }

    fn rig() -> Rig {
        rig_with(FakeCamera::default(), 0.4, None)
    }

    /// Register the face the provider currently reports.
    async fn enroll(rig: &Rig, name: &str) -> FaceId {
        rig.guard.mode_op(ModeOp::StartRegistering).await.unwrap();
        rig.provider.push(Ok(vec![face_at(0.0)]));
        rig.guard.capture(name).await.unwrap()
    }

    async fn wait_for_mode(rig: &mut Rig, mode: Mode) -> Transition {
        loop {
            let transition = tokio::time::timeout(WAIT, rig.transitions.recv())
                .await
                .expect("timed out waiting for transition")
                .unwrap();
            if transition.to == mode && transition.from != mode {
                return transition;
            }
        }
    }

    #[tokio::test]
    async fn test_monitoring_requires_gallery() {
        let rig = rig();
        let err = rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap_err();
        assert!(matches!(err, GuardError::Mode(ModeError::EmptyGallery)));
        assert_eq!(rig.guard.status().await.unwrap().mode, Mode::Idle);
    }

    #[tokio::test]
    async fn test_capture_enrolls_and_returns_to_idle() {
        let rig = rig();
        let id = enroll(&rig, "  ").await;

        let status = rig.guard.status().await.unwrap();
        assert_eq!(status.mode, Mode::Idle);
        assert_eq!(status.gallery_size, 1);

        let faces = rig.guard.list_faces().await.unwrap();
        assert_eq!(faces[0].id, id);
        assert_eq!(faces[0].name, "Face 1");
        let png = rig.guard.thumbnail(id).await.unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        // Round-trip so the engine has processed the close.
        rig.guard.status().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rig.camera.live(), 0);
    }

    #[tokio::test]
    async fn test_rejected_capture_stays_registering() {
        let rig = rig();
        rig.guard.mode_op(ModeOp::StartRegistering).await.unwrap();
        rig.provider.push(Ok(vec![face_at(0.0), face_at(0.2)]));

        let err = rig.guard.capture("pair").await.unwrap_err();
        assert!(matches!(
            err,
            GuardError::Capture(CaptureError::MultipleFacesDetected(2))
        ));
        let status = rig.guard.status().await.unwrap();
        assert_eq!(status.mode, Mode::Registering);
        assert_eq!(status.gallery_size, 0);

        let err = rig.guard.capture("nobody").await.unwrap_err();
        assert!(matches!(err, GuardError::Capture(CaptureError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn test_capture_outside_registering_rejected() {
        let rig = rig();
        let err = rig.guard.capture("x").await.unwrap_err();
        assert!(matches!(err, GuardError::Mode(ModeError::NotAllowed { .. })));
    }

    #[tokio::test]
    async fn test_close_face_raises_alarm() {
        let mut rig = rig();
        enroll(&rig, "owner").await;
        rig.provider.set_steady(vec![face_at(0.3)]);
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();

        let t = wait_for_mode(&mut rig, Mode::Alarmed).await;
        assert_eq!(t.from, Mode::Monitoring);
        assert_eq!(t.events, vec![ModeEvent::AlarmEntered(AlarmSource::Detection)]);

        let status = rig.guard.status().await.unwrap();
        assert_eq!(status.mode, Mode::Alarmed);
        assert_eq!(status.last_alarm.unwrap().source, "detection");
        assert_eq!(status.disguise, "vscode");
    }

    #[tokio::test]
    async fn test_distant_face_keeps_monitoring() {
        let rig = rig();
        enroll(&rig, "owner").await;
        rig.provider.set_steady(vec![face_at(0.45)]);
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let status = rig.guard.status().await.unwrap();
        assert_eq!(status.mode, Mode::Monitoring);
        assert!(status.detection.cycles > 0);
        assert!(matches!(status.camera, CameraState::Active { .. }));
    }

    #[tokio::test]
    async fn test_camera_failure_leaves_mode_inert() {
        let denied = CameraError::PermissionDenied("/dev/video0".into());
        let rig = rig_with(FakeCamera::failing(denied), 0.4, None);
        rig.guard.mode_op(ModeOp::StartRegistering).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = rig.guard.status().await.unwrap();
        assert_eq!(status.mode, Mode::Registering);
        assert!(matches!(status.camera, CameraState::Failed { .. }));
        assert_eq!(rig.camera.opens(), 1);

        // Re-entering retries the camera without changing mode.
        rig.camera.state.lock().unwrap().fail_open = None;
        assert_eq!(
            rig.guard.mode_op(ModeOp::StartRegistering).await.unwrap(),
            Mode::Registering
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = rig.guard.status().await.unwrap();
        assert!(matches!(status.camera, CameraState::Active { .. }));
        assert_eq!(rig.camera.opens(), 2);
        assert_eq!(rig.camera.live(), 1);
    }

    #[tokio::test]
    async fn test_external_detection_and_cancel() {
        let rig = rig();
        assert_eq!(
            rig.guard.mode_op(ModeOp::Cancel).await.unwrap(),
            Mode::Idle
        );
        assert_eq!(
            rig.guard.mode_op(ModeOp::ReportDetection).await.unwrap(),
            Mode::Alarmed
        );
        // Not a toggle.
        assert_eq!(
            rig.guard.mode_op(ModeOp::ReportDetection).await.unwrap(),
            Mode::Alarmed
        );
        assert_eq!(
            rig.guard.mode_op(ModeOp::Cancel).await.unwrap(),
            Mode::Idle
        );
    }

    #[tokio::test]
    async fn test_panic_toggle_rearms_monitoring() {
        let rig = rig();
        enroll(&rig, "owner").await;
        rig.provider.set_steady(vec![face_at(5.0)]);
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();

        assert_eq!(rig.guard.mode_op(ModeOp::TogglePanic).await.unwrap(), Mode::Alarmed);
        assert_eq!(rig.guard.mode_op(ModeOp::TogglePanic).await.unwrap(), Mode::Monitoring);

        let before = rig.provider.calls();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rig.provider.calls() > before, "detection resumed after toggle-off");
    }

    #[tokio::test]
    async fn test_exit_alarm_releases_camera() {
        let mut rig = rig();
        enroll(&rig, "owner").await;
        rig.provider.set_steady(vec![face_at(0.0)]);
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();
        wait_for_mode(&mut rig, Mode::Alarmed).await;

        assert_eq!(rig.guard.mode_op(ModeOp::ExitAlarm).await.unwrap(), Mode::Idle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rig.camera.live(), 0);
        assert_eq!(rig.guard.status().await.unwrap().mode, Mode::Idle);
    }

    #[tokio::test]
    async fn test_auto_clear_rearms_after_delay() {
        let mut rig = rig_with(FakeCamera::default(), 0.4, Some(Duration::from_millis(30)));
        enroll(&rig, "owner").await;
        rig.provider.set_steady(vec![face_at(0.0)]);
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();
        wait_for_mode(&mut rig, Mode::Alarmed).await;

        rig.provider.set_steady(Vec::new());
        let t = wait_for_mode(&mut rig, Mode::Monitoring).await;
        assert_eq!(t.events, vec![ModeEvent::AlarmExited(ExitReason::AutoClear)]);
    }

    #[tokio::test]
    async fn test_no_auto_clear_when_unconfigured() {
        let mut rig = rig();
        enroll(&rig, "owner").await;
        rig.provider.set_steady(vec![face_at(0.0)]);
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();
        wait_for_mode(&mut rig, Mode::Alarmed).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rig.guard.status().await.unwrap().mode, Mode::Alarmed);
    }

    #[tokio::test]
    async fn test_remove_last_face_keeps_monitoring() {
        let rig = rig();
        let id = enroll(&rig, "owner").await;
        rig.guard.mode_op(ModeOp::StartMonitoring).await.unwrap();

        assert!(rig.guard.remove_face(id).await.unwrap());
        assert!(!rig.guard.remove_face(id).await.unwrap());
        let status = rig.guard.status().await.unwrap();
        assert_eq!(status.mode, Mode::Monitoring);
        assert_eq!(status.gallery_size, 0);
        assert!(matches!(
            rig.guard.thumbnail(id).await.unwrap_err(),
            GuardError::UnknownFace(_)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_camera() {
        let rig = rig();
        rig.guard.mode_op(ModeOp::StartRegistering).await.unwrap();
        rig.guard.status().await.unwrap();
        rig.guard.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rig.camera.live(), 0);
        assert!(matches!(
            rig.guard.status().await.unwrap_err(),
            GuardError::ChannelClosed
        ));
    }
}
