//! Fixed-size image normalization for the classifier input.

use std::borrow::Cow;

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbImage};

/// Stretch `image` to exactly `width`×`height`.
///
/// An image that already has the target size is handed back borrowed and untouched.
/// Aspect ratio is not preserved. Returns `None` when no target buffer can be produced:
/// an empty source, an empty target, or a target too large to address.
pub fn resize(
    image: &DynamicImage,
    width: u32,
    height: u32,
    filter: FilterType,
) -> Option<Cow<'_, DynamicImage>> {
    if image.dimensions() == (width, height) && width > 0 && height > 0 {
        return Some(Cow::Borrowed(image));
    }

    let (src_width, src_height) = image.dimensions();
    if src_width == 0 || src_height == 0 {
        return None;
    }
    buffer_len(width, height, image.color().bytes_per_pixel())?;

    Some(Cow::Owned(image.resize_exact(width, height, filter)))
}

/// Byte length of a `width`×`height` buffer, or `None` when it cannot be allocated.
fn buffer_len(width: u32, height: u32, bytes_per_pixel: u8) -> Option<usize> {
    if width == 0 || height == 0 {
        return None;
    }
    let len = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(bytes_per_pixel as usize)?;
    (len <= isize::MAX as usize).then_some(len)
}

/// An RGB8 image of exactly the classifier's input size.
///
/// Built per request and handed to the backend by value; it is never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    /// Resize `image` and convert it to the fixed RGB8 layout.
    pub fn from_image(
        image: &DynamicImage,
        width: u32,
        height: u32,
        filter: FilterType,
    ) -> Option<Self> {
        let resized = resize(image, width, height, filter)?;
        Self::from_resized(&resized, width, height)
    }

    fn from_resized(image: &DynamicImage, width: u32, height: u32) -> Option<Self> {
        if image.dimensions() != (width, height) {
            return None;
        }
        Some(Self {
            pixels: image.to_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_rgb(self) -> RgbImage {
        self.pixels
    }
}

/// Stretch an RGB buffer to the given size, skipping the copy when it already fits.
pub(crate) fn fit_rgb(image: RgbImage, width: u32, height: u32, filter: FilterType) -> RgbImage {
    if image.dimensions() == (width, height) {
        image
    } else {
        imageops::resize(&image, width, height, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};

    #[test]
    fn test_identity_fast_path_returns_same_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(224, 224, Rgb([10, 20, 30])));
        let resized = resize(&img, 224, 224, FilterType::Triangle).unwrap();

        assert!(matches!(resized, Cow::Borrowed(_)));
        assert!(std::ptr::eq(resized.as_ref(), &img));
    }

    #[test]
    fn test_resize_stretches_to_target_regardless_of_aspect() {
        for (w, h) in [(100, 100), (640, 480), (50, 900), (1, 1), (225, 224)] {
            let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255])));
            let resized = resize(&img, 224, 224, FilterType::Triangle).unwrap();
            assert_eq!(resized.dimensions(), (224, 224), "source {}x{}", w, h);
        }
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(resize(&img, 224, 224, FilterType::Triangle).is_none());
        assert!(NormalizedImage::from_image(&img, 224, 224, FilterType::Triangle).is_none());
    }

    #[test]
    fn test_empty_target_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        assert!(resize(&img, 0, 224, FilterType::Triangle).is_none());
    }

    #[test]
    fn test_unaddressable_target_is_rejected() {
        assert!(buffer_len(u32::MAX, u32::MAX, 16).is_none());
        assert_eq!(buffer_len(224, 224, 3), Some(224 * 224 * 3));
    }

    #[test]
    fn test_normalized_image_is_rgb_at_target_size() {
        let img = DynamicImage::ImageLuma16(image::ImageBuffer::from_pixel(
            300,
            120,
            image::Luma([u16::MAX]),
        ));
        let normalized = NormalizedImage::from_image(&img, 224, 224, FilterType::Triangle).unwrap();

        assert_eq!((normalized.width(), normalized.height()), (224, 224));
        assert_eq!(normalized.as_rgb().get_pixel(0, 0), &Rgb([255, 255, 255]));
    }
}
