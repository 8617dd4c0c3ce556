//! lookout-hw: Camera capture and session lifecycle.
//!
//! Provides V4L2-based camera access behind the `FrameSource` and
//! `CameraOpener` seams, plus the single-stream `CameraSession`.

pub mod camera;
pub mod frame;
pub mod session;

pub use camera::{Camera, CameraError, CameraOpener, FrameSource, V4lOpener};
pub use frame::{Frame, FrameError, PixelFormat};
pub use session::{CameraSession, SessionInfo};
