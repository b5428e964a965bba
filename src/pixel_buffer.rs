use image::{ImageBuffer, Rgb, RgbImage};

use crate::errors::{DetectorError, Result};

/// Byte layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    /// 32-bit little-endian layout most capture APIs hand out.
    Bgra8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

/// A packed, device-ready frame that bypasses normalization.
///
/// The backend is responsible for fitting it to the model input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DetectorError::validation(
                "pixel buffer",
                format!("has empty dimensions {}x{}", width, height),
            ));
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| DetectorError::validation("pixel buffer", "is too large"))?;
        if data.len() != expected {
            return Err(DetectorError::validation(
                "pixel buffer",
                format!(
                    "expected {} bytes for {}x{} {:?}, got {}",
                    expected,
                    width,
                    height,
                    format,
                    data.len()
                ),
            ));
        }

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Drop alpha and reorder channels into RGB.
    pub fn to_rgb(&self) -> RgbImage {
        let bpp = self.format.bytes_per_pixel();
        let width = self.width as usize;
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            let i = (y as usize * width + x as usize) * bpp;
            let px = &self.data[i..i + bpp];
            match self.format {
                PixelFormat::Rgb8 | PixelFormat::Rgba8 => Rgb([px[0], px[1], px[2]]),
                PixelFormat::Bgra8 => Rgb([px[2], px[1], px[0]]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = PixelBuffer::new(2, 2, PixelFormat::Rgba8, vec![0; 15]).unwrap_err();
        assert!(matches!(err, DetectorError::Validation { .. }));
        assert!(PixelBuffer::new(0, 2, PixelFormat::Rgb8, vec![]).is_err());
    }

    #[test]
    fn test_bgra_is_reordered() {
        let buffer = PixelBuffer::new(1, 1, PixelFormat::Bgra8, vec![10, 20, 30, 255]).unwrap();
        assert_eq!(buffer.to_rgb().get_pixel(0, 0), &Rgb([30, 20, 10]));
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let buffer = PixelBuffer::new(2, 1, PixelFormat::Rgba8, data).unwrap();
        let rgb = buffer.to_rgb();
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([5, 6, 7]));
    }
}
