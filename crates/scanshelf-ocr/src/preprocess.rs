//! Image preprocessing before recognition.
//!
//! Steps run in a fixed order (grayscale, contrast, sharpen); each step is
//! switched on or off by [`PreprocessingOptions`]. Alpha is never modified.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};
use tracing::debug;

use scanshelf_core::error::{Result, ScanshelfError};
use scanshelf_core::types::PreprocessingOptions;

/// Contrast gain, equivalent to a 130% contrast filter.
pub const CONTRAST_GAIN: f32 = 1.3;

/// 3x3 sharpen kernel (row-major).
const SHARPEN_KERNEL: [[i32; 3]; 3] = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];

/// Decode image bytes in any supported format into RGBA.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ScanshelfError::Decode(format!("Unreadable image: {}", e)))?;
    Ok(image.to_rgba8())
}

/// Run the enabled steps over `image` in place.
pub fn apply(image: &mut RgbaImage, options: &PreprocessingOptions) {
    if options.grayscale {
        grayscale(image);
    }
    if options.contrast {
        contrast(image, CONTRAST_GAIN);
    }
    if options.sharpen {
        sharpen(image);
    }
}

/// Decode, preprocess, and re-encode as PNG for the OCR engine.
pub fn preprocess_to_png(bytes: &[u8], options: &PreprocessingOptions) -> Result<Vec<u8>> {
    let mut image = decode(bytes)?;
    apply(&mut image, options);
    debug!(
        width = image.width(),
        height = image.height(),
        grayscale = options.grayscale,
        contrast = options.contrast,
        sharpen = options.sharpen,
        "Image preprocessed"
    );
    encode_png(image)
}

/// Encode an RGBA image as PNG.
pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ScanshelfError::Decode(format!("Failed to encode PNG: {}", e)))?;
    Ok(buf.into_inner())
}

/// Replace R, G and B with their unweighted, rounded average.
pub fn grayscale(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let sum = r as u16 + g as u16 + b as u16;
        // sum / 3 never lands on .5, so (sum + 1) / 3 is round-to-nearest.
        let avg = ((sum + 1) / 3) as u8;
        pixel.0 = [avg, avg, avg, a];
    }
}

/// Stretch colour channels away from mid-grey by `gain`.
pub fn contrast(image: &mut RgbaImage, gain: f32) {
    let mut table = [0u8; 256];
    for (value, slot) in table.iter_mut().enumerate() {
        let stretched = (value as f32 - 127.5) * gain + 127.5;
        *slot = stretched.round().clamp(0.0, 255.0) as u8;
    }

    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        pixel.0 = [table[r as usize], table[g as usize], table[b as usize], a];
    }
}

/// Convolve colour channels with a 3x3 sharpen kernel. Edge pixels reuse
/// their nearest in-bounds neighbours.
pub fn sharpen(image: &mut RgbaImage) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let source = image.clone();

    for y in 0..height {
        for x in 0..width {
            let mut acc = [0i32; 3];
            for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    if *weight == 0 {
                        continue;
                    }
                    let sx = (x as i64 + kx as i64 - 1).clamp(0, width as i64 - 1) as u32;
                    let sy = (y as i64 + ky as i64 - 1).clamp(0, height as i64 - 1) as u32;
                    let neighbour = source.get_pixel(sx, sy).0;
                    for channel in 0..3 {
                        acc[channel] += weight * neighbour[channel] as i32;
                    }
                }
            }
            let pixel = image.get_pixel_mut(x, y);
            for channel in 0..3 {
                pixel.0[channel] = acc[channel].clamp(0, 255) as u8;
            }
        }
    }
}
