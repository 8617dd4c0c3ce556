use crate::config::Disguise;
use crate::guard::{GuardError, GuardHandle, ModeOp};
use crate::mode::{Mode, ModeError, ModeEvent, Transition};
use lookout_core::FaceId;
use tokio::sync::broadcast;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.lookout.Guard1";
pub const OBJECT_PATH: &str = "/org/lookout/Guard1";

/// D-Bus interface for the Lookout guard daemon.
///
/// Bus name: org.lookout.Guard1
/// Object path: /org/lookout/Guard1
pub struct GuardService {
    guard: GuardHandle,
}

impl GuardService {
    pub fn new(guard: GuardHandle) -> Self {
        Self { guard }
    }

    async fn mode_op(&self, op: ModeOp) -> fdo::Result<String> {
        tracing::debug!(?op, "mode request");
        let mode = self.guard.mode_op(op).await.map_err(to_fdo)?;
        Ok(mode.as_str().to_string())
    }
}

fn to_fdo(e: GuardError) -> fdo::Error {
    match e {
        GuardError::UnknownFace(_) => fdo::Error::InvalidArgs(e.to_string()),
        GuardError::Mode(ModeError::EmptyGallery) => fdo::Error::NotSupported(e.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn parse_face_id(id: &str) -> fdo::Result<FaceId> {
    id.parse()
        .map_err(|_| fdo::Error::InvalidArgs(format!("malformed face id '{id}'")))
}

#[interface(name = "org.lookout.Guard1")]
impl GuardService {
    /// Daemon status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.guard.status().await.map_err(to_fdo)?;
        serde_json::to_string(&status).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    async fn start_monitoring(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::StartMonitoring).await
    }

    async fn stop_monitoring(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::StopMonitoring).await
    }

    async fn start_registering(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::StartRegistering).await
    }

    async fn stop_registering(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::StopRegistering).await
    }

    /// Enroll the single face in view. Returns the new face id.
    async fn capture(&self, name: &str) -> fdo::Result<String> {
        tracing::info!(name, "capture requested");
        let id = self.guard.capture(name).await.map_err(to_fdo)?;
        Ok(id.to_string())
    }

    /// Enrolled faces as a JSON array.
    async fn list_faces(&self) -> fdo::Result<String> {
        let faces = self.guard.list_faces().await.map_err(to_fdo)?;
        serde_json::to_string(&faces).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    async fn remove_face(&self, id: &str) -> fdo::Result<bool> {
        let id = parse_face_id(id)?;
        let removed = self.guard.remove_face(id).await.map_err(to_fdo)?;
        tracing::info!(%id, removed, "remove_face requested");
        Ok(removed)
    }

    /// PNG crop taken at registration.
    async fn thumbnail(&self, id: &str) -> fdo::Result<Vec<u8>> {
        let id = parse_face_id(id)?;
        self.guard.thumbnail(id).await.map_err(to_fdo)
    }

    /// Panic hotkey.
    async fn toggle_panic(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::TogglePanic).await
    }

    /// A host-side watcher saw a face. Ignored while alarmed.
    async fn report_detection(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::ReportDetection).await
    }

    /// Exit action of the disguise view.
    async fn exit_alarm(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::ExitAlarm).await
    }

    /// Cancellation key.
    async fn cancel(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::Cancel).await
    }

    async fn clear_alarm(&self) -> fdo::Result<String> {
        self.mode_op(ModeOp::ClearAlarm).await
    }

    /// Host window visibility; drives hidden throttling.
    async fn set_visible(&self, visible: bool) -> fdo::Result<()> {
        self.guard.set_visible(visible).await.map_err(to_fdo)
    }

    #[zbus(signal)]
    async fn mode_changed(
        emitter: &SignalEmitter<'_>,
        from: &str,
        to: &str,
        label: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn alarm_entered(
        emitter: &SignalEmitter<'_>,
        source: &str,
        disguise: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn alarm_exited(emitter: &SignalEmitter<'_>, reason: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn monitoring_started(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn monitoring_stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn registering_started(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn registering_stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}

/// Re-emit guard transitions as D-Bus signals until the guard goes away.
/// Emission failures are logged; they never feed back into the guard.
pub async fn forward_signals(
    conn: zbus::Connection,
    mut transitions: broadcast::Receiver<Transition>,
    disguise: Disguise,
) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(e) => {
            tracing::warn!(error = %e, "cannot emit signals; forwarder disabled");
            return;
        }
    };

    loop {
        let transition = match transitions.recv().await {
            Ok(transition) => transition,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "signal forwarder lagged; transitions dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Err(e) = emit(&emitter, &transition, disguise).await {
            tracing::warn!(error = %e, to = %transition.to, "signal emission failed");
        }
    }
}

async fn emit(
    emitter: &SignalEmitter<'_>,
    transition: &Transition,
    disguise: Disguise,
) -> zbus::Result<()> {
    for event in &transition.events {
        match event {
            ModeEvent::RegisteringStarted => GuardService::registering_started(emitter).await?,
            ModeEvent::RegisteringStopped => GuardService::registering_stopped(emitter).await?,
            ModeEvent::MonitoringStarted => GuardService::monitoring_started(emitter).await?,
            ModeEvent::MonitoringStopped => GuardService::monitoring_stopped(emitter).await?,
            ModeEvent::AlarmEntered(source) => {
                GuardService::alarm_entered(emitter, source.as_str(), disguise.as_str()).await?
            }
            ModeEvent::AlarmExited(reason) => {
                GuardService::alarm_exited(emitter, reason.as_str()).await?
            }
        }
    }
    if transition.from != transition.to {
        GuardService::mode_changed(
            emitter,
            transition.from.as_str(),
            transition.to.as_str(),
            Mode::label(&transition.to),
        )
        .await?;
    }
    Ok(())
}
