//! Shared helpers for crate tests.

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};

/// Encode an image as PNG bytes.
pub(crate) fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// A deterministic grayscale gradient; different seeds give visually
/// different images.
pub(crate) fn gradient_image(seed: u8) -> DynamicImage {
    let img = ImageBuffer::from_fn(32, 32, |x, y| {
        Luma([((x * 7 + y * 3) as u8).wrapping_add(seed)])
    });
    DynamicImage::ImageLuma8(img)
}

/// PNG bytes of a deterministic test image.
pub(crate) fn test_png(seed: u8) -> Vec<u8> {
    png_bytes(&gradient_image(seed))
}
