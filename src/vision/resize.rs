use crate::upload::ValidatedImage;
use crate::vision::claude::MAX_BASE64_BYTES;
use image::{DynamicImage, GenericImageView, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;
use tracing::info;

const JPEG_QUALITY: u8 = 85;
const MAX_ATTEMPTS: usize = 4;
const SHRINK_STEP: f64 = 0.75;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image could not be re-encoded: {0}")]
    Encode(String),
    #[error("image is still larger than {limit} base64 bytes after downscaling")]
    StillTooLarge { limit: usize },
}

pub fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

fn fits(raw_len: usize) -> bool {
    base64_len(raw_len) <= MAX_BASE64_BYTES
}

/// Shrinks an image until its base64 form fits the vision API limit.
///
/// Images already under the limit come back untouched. Larger ones are
/// decoded, scaled down by area to roughly the raw-byte budget and
/// re-encoded as JPEG; each further attempt shrinks by another quarter.
pub fn fit_for_vision(image: ValidatedImage) -> Result<ValidatedImage, ResizeError> {
    if fits(image.bytes.len()) {
        return Ok(image);
    }

    let decoded =
        image::load_from_memory(&image.bytes).map_err(|err| ResizeError::Decode(err.to_string()))?;
    let (width, height) = decoded.dimensions();
    let target_raw = (MAX_BASE64_BYTES / 4 * 3) as f64;
    let mut scale = (target_raw / image.bytes.len() as f64).sqrt().min(1.0);

    for attempt in 1..=MAX_ATTEMPTS {
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        let filter = select_filter(width, height, new_width, new_height);
        let resized = decoded.resize_exact(new_width, new_height, filter);
        let bytes = encode_jpeg(&resized)?;
        info!(
            target = "photosearch.vision",
            attempt,
            from = %format!("{width}x{height}"),
            to = %format!("{new_width}x{new_height}"),
            original_bytes = image.bytes.len(),
            bytes = bytes.len(),
            "image_downscaled"
        );
        if fits(bytes.len()) {
            return Ok(ValidatedImage {
                media_type: "image/jpeg",
                bytes,
            });
        }
        scale *= SHRINK_STEP;
    }

    Err(ResizeError::StillTooLarge {
        limit: MAX_BASE64_BYTES,
    })
}

/// Cheaper filters for large reductions, Lanczos when the change is small.
fn select_filter(width: u32, height: u32, new_width: u32, new_height: u32) -> FilterType {
    let ratio = (width as f32 / new_width as f32).max(height as f32 / new_height as f32);
    if ratio > 2.0 {
        FilterType::Triangle
    } else if ratio > 1.5 {
        FilterType::CatmullRom
    } else {
        FilterType::Lanczos3
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, ResizeError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .map_err(|err| ResizeError::Encode(err.to_string()))?;
    Ok(out)
}

/// PNG of hash noise, which barely compresses: about `3 * width * height` bytes.
#[cfg(test)]
pub(crate) fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn mix(seed: u64) -> u64 {
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    let pixels = RgbImage::from_fn(width, height, |x, y| {
        let v = mix(u64::from(y) * u64::from(width) + u64::from(x));
        image::Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(pixels)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validated(media_type: &'static str, bytes: Vec<u8>) -> ValidatedImage {
        ValidatedImage { media_type, bytes }
    }

    #[test]
    fn small_images_pass_through_untouched() {
        let png = noisy_png(64, 48);
        let out = fit_for_vision(validated("image/png", png.clone())).unwrap();
        assert_eq!(out.media_type, "image/png");
        assert_eq!(out.bytes, png);
    }

    #[test]
    fn phone_sized_photo_is_downscaled_under_the_limit() {
        let png = noisy_png(1200, 1000);
        assert!(base64_len(png.len()) > MAX_BASE64_BYTES);

        let out = fit_for_vision(validated("image/png", png)).unwrap();
        assert_eq!(out.media_type, "image/jpeg");
        assert!(base64_len(out.bytes.len()) <= MAX_BASE64_BYTES);
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert!(decoded.width() < 1200 && decoded.height() < 1000);
    }

    #[test]
    fn undecodable_oversized_bytes_are_rejected() {
        let mut bytes = b"\xff\xd8\xff\xe0".to_vec();
        bytes.resize(4 * 1024 * 1024, 0xAB);
        let err = fit_for_vision(validated("image/jpeg", bytes)).unwrap_err();
        assert!(matches!(err, ResizeError::Decode(_)));
    }

    #[test]
    fn base64_length_rounds_up_to_whole_quads() {
        assert_eq!(base64_len(0), 0);
        assert_eq!(base64_len(1), 4);
        assert_eq!(base64_len(3), 4);
        assert_eq!(base64_len(4), 8);
    }

    #[test]
    fn filter_follows_reduction_ratio() {
        assert_eq!(select_filter(1000, 1000, 900, 900), FilterType::Lanczos3);
        assert_eq!(select_filter(1000, 1000, 600, 600), FilterType::CatmullRom);
        assert_eq!(select_filter(1000, 1000, 400, 400), FilterType::Triangle);
    }
}
