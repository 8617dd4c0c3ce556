//! Detection loop, run on a dedicated OS thread.
//!
//! The engine owns the camera session and the embedding provider. The guard
//! task drives it with [`EngineHandle`] commands and hears back through
//! [`EngineEvent`]s; frame processing never blocks the async runtime.

use crate::config::Config;
use lookout_core::thumbnail::crop_thumbnail;
use lookout_core::{
    match_faces, Embedding, EmbeddingProvider, EnrolledFace, EuclideanMatcher, LoadedProvider,
    MatchResult, ReadinessGate,
};
use lookout_hw::{CameraError, CameraOpener, CameraSession, Frame, SessionInfo};
use serde::Serialize;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera is not running")]
    CameraInactive,
    #[error("embedding provider is not ready")]
    ProviderNotReady,
    #[error("camera produced no usable frame")]
    NoFrame,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{0} faces detected; exactly one face must be visible")]
    MultipleFacesDetected(usize),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("thumbnail error: {0}")]
    Thumbnail(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// A single face captured for enrollment.
#[derive(Debug, Clone)]
pub struct Capture {
    pub embedding: Embedding,
    /// PNG crop of the face.
    pub thumbnail: Vec<u8>,
    pub confidence: f32,
}

/// Why the camera is being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Registering,
    Monitoring,
}

/// Reports from the engine thread, tagged with the camera session they
/// belong to so the guard can drop stale ones.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CameraStarted { session: u64, info: SessionInfo },
    CameraFailed { session: u64, error: CameraError },
    Matched { session: u64, result: MatchResult },
}

/// Running counters for the detection loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    /// Frames run through the provider.
    pub cycles: u64,
    /// Cycles lost to a camera or provider error.
    pub failed_cycles: u64,
    /// Ticks with no frame ready or no provider loaded.
    pub skipped_cycles: u64,
    pub last_face_count: usize,
    pub last_best_distance: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub hidden_poll_interval: Duration,
    pub throttle_when_hidden: bool,
    pub match_threshold: f32,
    pub capture_attempts: usize,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            hidden_poll_interval: config.hidden_poll_interval,
            throttle_when_hidden: config.throttle_when_hidden,
            match_threshold: config.match_threshold,
            capture_attempts: config.capture_attempts,
        }
    }
}

enum EngineCommand {
    Open { session: u64, purpose: Purpose },
    Close,
    /// Replace the gallery and start evaluating frames.
    Arm(Vec<EnrolledFace>),
    /// Replace the gallery without changing whether frames are evaluated.
    UpdateGallery(Vec<EnrolledFace>),
    Disarm,
    Capture(oneshot::Sender<Result<Capture, CaptureError>>),
    SetVisible(bool),
    InstallProvider(LoadedProvider),
    Shutdown,
}

/// Clone-safe handle to the engine thread.
///
/// Commands are fire-and-forget except [`EngineHandle::capture`]; a closed
/// engine only matters at shutdown, so send failures are logged and dropped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: std_mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    fn send(&self, command: EngineCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("engine thread gone; command dropped");
        }
    }

    pub fn open(&self, session: u64, purpose: Purpose) {
        self.send(EngineCommand::Open { session, purpose });
    }

    pub fn close(&self) {
        self.send(EngineCommand::Close);
    }

    pub fn arm(&self, gallery: Vec<EnrolledFace>) {
        self.send(EngineCommand::Arm(gallery));
    }

    pub fn update_gallery(&self, gallery: Vec<EnrolledFace>) {
        self.send(EngineCommand::UpdateGallery(gallery));
    }

    pub fn disarm(&self) {
        self.send(EngineCommand::Disarm);
    }

    pub fn set_visible(&self, visible: bool) {
        self.send(EngineCommand::SetVisible(visible));
    }

    pub fn install_provider(&self, loaded: LoadedProvider) {
        self.send(EngineCommand::InstallProvider(loaded));
    }

    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }

    /// Grab a frame from the open camera and extract exactly one face.
    pub async fn capture(&self) -> Result<Capture, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Capture(reply_tx))
            .map_err(|_| CaptureError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CaptureError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The camera stays closed until the first `open`; frames are only
/// evaluated once the provider is installed and the engine is armed.
pub fn spawn_engine(
    opener: Box<dyn CameraOpener>,
    settings: LoopSettings,
    gate: ReadinessGate,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> Result<(EngineHandle, watch::Receiver<CycleStats>), EngineError> {
    let (tx, rx) = std_mpsc::channel();
    let (stats_tx, stats_rx) = watch::channel(CycleStats::default());

    let engine = Engine {
        camera: CameraSession::new(opener),
        provider: None,
        gate,
        settings,
        session: 0,
        purpose: None,
        armed: false,
        gallery: Vec::new(),
        visible: true,
        events,
        stats: stats_tx,
    };

    std::thread::Builder::new()
        .name("lookout-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            engine.run(rx);
            tracing::info!("engine thread exiting");
        })?;

    Ok((EngineHandle { tx }, stats_rx))
}

struct Engine {
    camera: CameraSession,
    provider: Option<Box<dyn EmbeddingProvider>>,
    gate: ReadinessGate,
    settings: LoopSettings,
    session: u64,
    purpose: Option<Purpose>,
    armed: bool,
    gallery: Vec<EnrolledFace>,
    visible: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
    stats: watch::Sender<CycleStats>,
}

impl Engine {
    fn run(mut self, rx: std_mpsc::Receiver<EngineCommand>) {
        let mut next_tick = Instant::now();
        loop {
            let received = if self.is_live() {
                rx.recv_timeout(next_tick.saturating_duration_since(Instant::now()))
            } else {
                rx.recv().map_err(|_| std_mpsc::RecvTimeoutError::Disconnected)
            };

            match received {
                Ok(EngineCommand::Shutdown) => break,
                Ok(command) => {
                    let was_live = self.is_live();
                    let interval = self.interval();
                    self.handle(command);
                    if !was_live && self.is_live() {
                        next_tick = Instant::now();
                    } else if self.interval() < interval {
                        // Leaving the hidden throttle must not wait out the long tick.
                        next_tick = next_tick.min(Instant::now() + self.interval());
                    }
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    self.cycle();
                    next_tick = Instant::now() + self.interval();
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.camera.stop();
    }

    /// Monitoring with an open camera and an armed gallery.
    fn is_live(&self) -> bool {
        self.armed && self.purpose == Some(Purpose::Monitoring) && self.camera.is_active()
    }

    fn interval(&self) -> Duration {
        if self.settings.throttle_when_hidden && !self.visible {
            self.settings.hidden_poll_interval
        } else {
            self.settings.poll_interval
        }
    }

    fn emit(&self, event: EngineEvent) {
        // The guard only goes away at shutdown.
        let _ = self.events.send(event);
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Open { session, purpose } => {
                self.session = session;
                self.purpose = Some(purpose);
                self.armed = false;
                match self.camera.start() {
                    Ok(info) => self.emit(EngineEvent::CameraStarted { session, info }),
                    Err(error) => {
                        tracing::warn!(session, error = %error, "camera failed to start");
                        self.emit(EngineEvent::CameraFailed { session, error });
                    }
                }
            }
            EngineCommand::Close => {
                self.camera.stop();
                self.purpose = None;
                self.armed = false;
            }
            EngineCommand::Arm(gallery) => {
                tracing::debug!(faces = gallery.len(), "detection armed");
                self.gallery = gallery;
                self.armed = true;
            }
            EngineCommand::UpdateGallery(gallery) => {
                tracing::debug!(faces = gallery.len(), "gallery updated");
                self.gallery = gallery;
            }
            EngineCommand::Disarm => self.armed = false,
            EngineCommand::Capture(reply) => {
                let result = self.capture();
                let _ = reply.send(result);
            }
            EngineCommand::SetVisible(visible) => self.visible = visible,
            EngineCommand::InstallProvider(loaded) => {
                tracing::info!(
                    origin = loaded.origin.as_str(),
                    source = %loaded.source_name,
                    "embedding provider installed"
                );
                self.provider = Some(loaded.provider);
                self.gate.open();
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// One detection tick. Errors are logged and counted; the loop goes on.
    fn cycle(&mut self) {
        let Some(provider) = self.provider.as_mut().filter(|_| self.gate.is_ready()) else {
            self.stats.send_modify(|s| s.skipped_cycles += 1);
            return;
        };

        let frame = match self.camera.frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stats.send_modify(|s| s.skipped_cycles += 1);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                self.stats.send_modify(|s| s.failed_cycles += 1);
                return;
            }
        };

        let faces = match provider.detect(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "inference failed; frame skipped");
                self.stats.send_modify(|s| s.failed_cycles += 1);
                return;
            }
        };

        let result = match_faces(
            &EuclideanMatcher,
            &faces,
            &self.gallery,
            self.settings.match_threshold,
        );
        self.stats.send_modify(|s| {
            s.cycles += 1;
            s.last_face_count = faces.len();
            s.last_best_distance = result.best_distance.is_finite().then_some(result.best_distance);
        });

        if result.matched {
            tracing::info!(
                distance = result.best_distance,
                face = ?result.best_enrolled_id,
                "enrolled face matched"
            );
            self.armed = false;
            self.emit(EngineEvent::Matched {
                session: self.session,
                result,
            });
        }
    }

    fn capture(&mut self) -> Result<Capture, CaptureError> {
        if !self.camera.is_active() {
            return Err(CaptureError::CameraInactive);
        }
        if !self.gate.is_ready() {
            return Err(CaptureError::ProviderNotReady);
        }
        let frame = self.ready_frame()?;
        let provider = self
            .provider
            .as_mut()
            .ok_or(CaptureError::ProviderNotReady)?;

        let mut faces = provider
            .detect(&frame.data, frame.width, frame.height)
            .map_err(|e| CaptureError::Provider(e.to_string()))?;
        let face = match faces.len() {
            0 => return Err(CaptureError::NoFaceDetected),
            1 => faces.remove(0),
            n => return Err(CaptureError::MultipleFacesDetected(n)),
        };

        let thumbnail = crop_thumbnail(&frame.data, frame.width, frame.height, &face.region)
            .map_err(|e| CaptureError::Thumbnail(e.to_string()))?;
        tracing::info!(confidence = face.confidence, "face captured");

        Ok(Capture {
            embedding: face.embedding,
            thumbnail,
            confidence: face.confidence,
        })
    }

    /// First usable frame within `capture_attempts` tries.
    fn ready_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut last_error = None;
        for attempt in 1..=self.settings.capture_attempts {
            match self.camera.frame() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => tracing::debug!(attempt, "frame not ready"),
                Err(CameraError::CaptureFailed(msg)) => {
                    tracing::debug!(attempt, error = %msg, "capture attempt failed");
                    last_error = Some(CameraError::CaptureFailed(msg));
                }
                Err(e) => return Err(e.into()),
            }
            std::thread::sleep(self.settings.poll_interval);
        }
        Err(last_error.map_or(CaptureError::NoFrame, CaptureError::from))
    }
}
