//! Registration thumbnails: a fixed-size PNG crop of the captured face.

use crate::types::Region;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Edge length of every thumbnail, in pixels.
pub const THUMBNAIL_SIZE: u32 = 96;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("face region lies outside the frame")]
    EmptyRegion,
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Crop `region` out of a grayscale frame, scale it to
/// `THUMBNAIL_SIZE`×`THUMBNAIL_SIZE` and encode it as PNG.
pub fn crop_thumbnail(
    pixels: &[u8],
    width: u32,
    height: u32,
    region: &Region,
) -> Result<Vec<u8>, ThumbnailError> {
    let expected = width as usize * height as usize;
    let frame = GrayImage::from_raw(width, height, pixels.to_vec()).ok_or(
        ThumbnailError::InvalidFrame {
            expected,
            actual: pixels.len(),
        },
    )?;

    let (x, y, w, h) = region
        .clamp_to(width, height)
        .ok_or(ThumbnailError::EmptyRegion)?;

    let crop = imageops::crop_imm(&frame, x, y, w, h).to_image();
    let scaled = imageops::resize(&crop, THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle);

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(scaled).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_is_fixed_size_png() {
        let (w, h) = (64u32, 48u32);
        let pixels: Vec<u8> = (0..w * h).map(|i| (i % 251) as u8).collect();
        let region = Region { x: 10.0, y: 5.0, width: 20.0, height: 30.0 };

        let png = crop_thumbnail(&pixels, w, h, &region).unwrap();
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), THUMBNAIL_SIZE);
        assert_eq!(decoded.height(), THUMBNAIL_SIZE);
    }

    #[test]
    fn test_region_partly_outside_is_clamped() {
        let pixels = vec![200u8; 32 * 32];
        let region = Region { x: 20.0, y: 20.0, width: 50.0, height: 50.0 };
        assert!(crop_thumbnail(&pixels, 32, 32, &region).is_ok());
    }

    #[test]
    fn test_region_outside_frame() {
        let pixels = vec![0u8; 16];
        let region = Region { x: 10.0, y: 10.0, width: 2.0, height: 2.0 };
        assert!(matches!(
            crop_thumbnail(&pixels, 4, 4, &region),
            Err(ThumbnailError::EmptyRegion)
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let region = Region { x: 0.0, y: 0.0, width: 2.0, height: 2.0 };
        assert!(matches!(
            crop_thumbnail(&[0u8; 3], 2, 2, &region),
            Err(ThumbnailError::InvalidFrame { expected: 4, actual: 3 })
        ));
    }
}
