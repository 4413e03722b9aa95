use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

// ── Constants ───────────────────────────────────────────────────────────────

/// Upper bound on classifier payload pixels. Anything larger is downscaled so
/// the remote model never sees an image above ~2 megapixels.
pub const MAX_PIXELS: u32 = 2_000_000;

/// JPEG quality for the re-encoded payload.
pub const JPEG_QUALITY: u8 = 85;

// ── Types ───────────────────────────────────────────────────────────────────

/// A normalized image ready to be embedded in a classifier request.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    /// The uploaded bytes are not a decodable image. Deterministic for a given
    /// input, so the pipeline never retries it.
    #[error("could not decode document image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("could not encode classifier payload: {0}")]
    Encode(image::ImageError),
}

// ── Preprocessing ───────────────────────────────────────────────────────────

/// Normalizes raw upload bytes into the payload sent to the classifier:
/// alpha flattened onto white, downscaled to at most [`MAX_PIXELS`] with the
/// aspect ratio preserved, and re-encoded as JPEG at quality 85 regardless of
/// the input format.
pub fn prepare_for_classifier(raw: &[u8]) -> Result<EncodedImage, PreprocessError> {
    let decoded = image::load_from_memory(raw)?;
    let mut rgb = flatten_to_rgb(decoded);

    let (width, height) = rgb.dimensions();
    let pixels = u64::from(width) * u64::from(height);
    if pixels > u64::from(MAX_PIXELS) {
        let scale = (f64::from(MAX_PIXELS) / pixels as f64).sqrt();
        let new_width = ((f64::from(width) * scale) as u32).max(1);
        let new_height = ((f64::from(height) * scale) as u32).max(1);
        rgb = image::imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3);
    }

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(PreprocessError::Encode)?;

    Ok(EncodedImage {
        bytes: buf.into_inner(),
        mime_type: "image/jpeg",
    })
}

/// Converts any decoded image to RGB, compositing transparent pixels over an
/// opaque white background rather than letting alpha collapse to black.
fn flatten_to_rgb(decoded: DynamicImage) -> RgbImage {
    match decoded {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            let rgba = other.to_rgba8();
            let mut rgb = RgbImage::new(rgba.width(), rgba.height());
            for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
                let alpha = u32::from(src.0[3]);
                dst.0 = [
                    over_white(src.0[0], alpha),
                    over_white(src.0[1], alpha),
                    over_white(src.0[2], alpha),
                ];
            }
            rgb
        }
    }
}

fn over_white(channel: u8, alpha: u32) -> u8 {
    ((u32::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
}

// ── Tests ───────────────────────────────────────────────────────────────────
