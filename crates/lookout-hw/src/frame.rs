//! Grayscale frames and raw-buffer decoding.

use std::time::Instant;

/// Pixels below this luma count as black.
const BLACK_LEVEL: u8 = 32;

/// Pixel layout of raw capture buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2, `[Y0 U Y1 V]`; luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Yuyv => 2,
            PixelFormat::Grey => 1,
        }
    }

    /// Extract the luma plane from a raw buffer. Trailing driver padding is
    /// dropped; a short buffer is an error.
    pub fn luma(&self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let pixels = width as usize * height as usize;
        let expected = pixels * self.bytes_per_pixel();
        let raw = raw.get(..expected).ok_or(FrameError::InvalidLength {
            expected,
            actual: raw.len(),
        })?;
        Ok(match self {
            PixelFormat::Yuyv => raw.iter().step_by(2).copied().collect(),
            PixelFormat::Grey => raw.to_vec(),
        })
    }
}

/// One grayscale camera frame, `width * height` bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Decode a raw capture buffer.
    pub fn decode(
        format: PixelFormat,
        raw: &[u8],
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        Ok(Self {
            data: format.luma(raw, width, height)?,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// Share of near-black pixels, in `0.0..=1.0`. An empty frame is all black.
    pub fn black_fraction(&self) -> f32 {
        if self.data.is_empty() {
            return 1.0;
        }
        let black = self.data.iter().filter(|&&p| p < BLACK_LEVEL).count();
        black as f32 / self.data.len() as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("short capture buffer: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
