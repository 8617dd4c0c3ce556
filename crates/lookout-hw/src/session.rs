//! Camera session lifecycle: at most one live stream, released on `stop`.

use crate::camera::{CameraError, CameraOpener, FrameSource};
use crate::frame::Frame;

/// Descriptor of the stream opened by [`CameraSession::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Owns acquisition and release of the live camera stream.
///
/// Does not itself prevent two consumers; callers keep a single logical
/// owner of the session.
pub struct CameraSession {
    opener: Box<dyn CameraOpener>,
    source: Option<Box<dyn FrameSource>>,
}

impl CameraSession {
    pub fn new(opener: Box<dyn CameraOpener>) -> Self {
        Self {
            opener,
            source: None,
        }
    }

    /// Acquire the camera. A session that is already live is reused.
    pub fn start(&mut self) -> Result<SessionInfo, CameraError> {
        if let Some(source) = &self.source {
            tracing::debug!(device = %source.describe(), "camera session already active");
            return Ok(info_of(source.as_ref()));
        }

        let source = self.opener.open()?;
        let info = info_of(source.as_ref());
        tracing::info!(device = %info.device, width = info.width, height = info.height, "camera session started");
        self.source = Some(source);
        Ok(info)
    }

    /// Release the camera. Safe to call when already stopped.
    pub fn stop(&mut self) {
        if let Some(source) = self.source.take() {
            tracing::info!(device = %source.describe(), "camera session stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    /// Pull the current frame. `Ok(None)` when stopped or not ready yet.
    pub fn frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.source.as_mut() {
            Some(source) => source.next_frame(),
            None => Ok(None),
        }
    }
}

fn info_of(source: &dyn FrameSource) -> SessionInfo {
    let (width, height) = source.resolution();
    SessionInfo {
        device: source.describe(),
        width,
        height,
    }
}
