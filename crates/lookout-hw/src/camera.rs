//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{Frame, PixelFormat};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;

/// Buffers queued on the capture stream.
const STREAM_BUFFERS: u32 = 4;

/// Share of near-black pixels above which a frame counts as "not ready".
const WARMUP_BLACK_FRACTION: f32 = 0.95;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl CameraError {
    /// Classify an I/O error raised while opening `device_path`.
    fn from_open(device_path: &str, e: &io::Error) -> Self {
        if e.kind() == io::ErrorKind::PermissionDenied {
            CameraError::PermissionDenied(format!("{device_path}: {e}"))
        } else if e.raw_os_error() == Some(EBUSY) {
            CameraError::DeviceUnavailable(format!("{device_path}: device busy"))
        } else {
            CameraError::DeviceUnavailable(format!("{device_path}: {e}"))
        }
    }
}

/// Anything that can hand out frames on demand.
pub trait FrameSource: Send {
    /// Grab the current frame. `Ok(None)` means no usable frame yet.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Negotiated `(width, height)`.
    fn resolution(&self) -> (u32, u32);

    /// Human-readable name of the underlying device.
    fn describe(&self) -> String;
}

/// Opens a fresh [`FrameSource`]; one call per camera session.
pub trait CameraOpener: Send {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Dequeues raw buffers from a running capture stream.
trait RawStream: Send {
    /// Next filled buffer and its driver sequence number.
    fn next_buffer(&mut self) -> io::Result<(&[u8], u32)>;
}

impl RawStream for MmapStream<'static> {
    fn next_buffer(&mut self) -> io::Result<(&[u8], u32)> {
        let (buf, meta) = CaptureStream::next(self)?;
        Ok((buf, meta.sequence))
    }
}

/// V4L2 camera with a stream that stays on until the camera is dropped.
pub struct Camera {
    stream: Box<dyn RawStream>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera, asking for `width`×`height` YUYV, and start
    /// streaming. GREY is accepted when that is what the driver settles on.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: no such device"
            )));
        }

        let device =
            Device::with_path(device_path).map_err(|e| CameraError::from_open(device_path, &e))?;

        let caps = device.query_caps().map_err(|e| CameraError::from_open(device_path, &e))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut requested = device.format().map_err(|e| {
            CameraError::DeviceUnavailable(format!("{device_path}: cannot read format: {e}"))
        })?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = width;
        requested.height = height;

        let negotiated = device.set_format(&requested).map_err(|e| {
            CameraError::DeviceUnavailable(format!("{device_path}: cannot set format: {e}"))
        })?;
        let fourcc = negotiated.fourcc;
        let pixel_format = pixel_format_of(fourcc).ok_or_else(|| {
            CameraError::DeviceUnavailable(format!(
                "{device_path}: driver offers {fourcc}, need YUYV or GREY"
            ))
        })?;
        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            ?pixel_format,
            "capture format negotiated"
        );

        // The stream keeps its own handle on the device; STREAMOFF happens on drop.
        let stream: MmapStream<'static> =
            MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS).map_err(
                |e| CameraError::DeviceUnavailable(format!("{device_path}: cannot start stream: {e}")),
            )?;

        Ok(Self {
            stream: Box::new(stream),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }
}

fn pixel_format_of(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"GREY" => Some(PixelFormat::Grey),
        _ => None,
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let (buf, sequence) = self
            .stream
            .next_buffer()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let frame = Frame::decode(self.pixel_format, buf, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        if frame.black_fraction() > WARMUP_BLACK_FRACTION {
            tracing::debug!(seq = sequence, "dark frame; camera not ready");
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}

/// Opens a V4L2 [`Camera`] with fixed parameters.
#[derive(Debug, Clone)]
pub struct V4lOpener {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
}

impl CameraOpener for V4lOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.device_path, self.width, self.height)?;
        Ok(Box::new(camera))
    }
}
