//
// render.rs
// dicomweb-static
//
// Decodes DICOM pixel data into an 8-bit PNG frame with optional window/level
// normalization, and derives bounded thumbnails from rendered frames.
//

use std::io::Cursor;

use dicom::core::Tag;
use dicom::object::DefaultDicomObject;
use dicom::pixeldata::PixelDecoder;
use dicom_pixeldata::{DecodedPixelData, PixelRepresentation};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, RgbImage};
use ndarray::ArrayD;
use thiserror::Error;

use crate::dicom_access::ElementAccess;

/// Neither thumbnail dimension may exceed this bound.
pub const THUMBNAIL_MAX: u32 = 128;

/// Per-instance rendering failures. All variants are recoverable: the caller
/// skips the artifact and continues with the rest of the run.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pixel data could not be decoded: {0}")]
    Decode(String),
    #[error("pixel buffer could not be converted: {0}")]
    Convert(String),
    #[error("unsupported sample layout ({0} samples per pixel)")]
    UnsupportedLayout(u16),
    #[error("image encoding failed: {0}")]
    Encode(String),
}

/// Render the first frame of an instance as PNG bytes.
///
/// Windowing uses the instance's (0028,1050)/(0028,1051) pair when both are
/// present, taking the first value of multi-valued tags; otherwise the
/// buffer's own min/max bounds the rescale.
pub fn render_frame(obj: &DefaultDicomObject) -> Result<Vec<u8>, RenderError> {
    let decoded = obj
        .decode_pixel_data()
        .map_err(|e| RenderError::Decode(e.to_string()))?;

    let rows = decoded.rows();
    let columns = decoded.columns();
    let samples = decoded.samples_per_pixel();
    let buffer = decode_as_f32(&decoded)?.into_raw_vec();

    let frame_len = rows as usize * columns as usize * samples as usize;
    if frame_len == 0 || buffer.len() < frame_len {
        return Err(RenderError::Convert(format!(
            "pixel buffer holds {} samples, frame needs {}",
            buffer.len(),
            frame_len
        )));
    }
    // One frame per instance: multi-frame buffers contribute their first frame only.
    let frame = &buffer[..frame_len];

    let window = window_of(obj);
    let pixels = normalize_to_u8(frame, window);

    let image = match samples {
        1 => GrayImage::from_raw(columns, rows, pixels)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| RenderError::Convert("gray buffer size mismatch".into()))?,
        3 => RgbImage::from_raw(columns, rows, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| RenderError::Convert("rgb buffer size mismatch".into()))?,
        other => return Err(RenderError::UnsupportedLayout(other)),
    };

    encode_png(&image)
}

/// Derive a thumbnail from an already rendered PNG frame, preserving aspect
/// ratio so neither dimension exceeds `max_dim`. Frames already within the
/// bound are re-encoded unscaled.
pub fn thumbnail_png(frame_png: &[u8], max_dim: u32) -> Result<Vec<u8>, RenderError> {
    let image =
        image::load_from_memory(frame_png).map_err(|e| RenderError::Decode(e.to_string()))?;
    let thumb = if image.width() > max_dim || image.height() > max_dim {
        image.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        image
    };
    encode_png(&thumb)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, RenderError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(buffer)
}

fn window_of(obj: &DefaultDicomObject) -> Option<(f64, f64)> {
    let center = obj.element_f64(Tag(0x0028, 0x1050))?;
    let width = obj.element_f64(Tag(0x0028, 0x1051))?;
    Some((center, width))
}

/// Convert the decoded buffer to an f32 array, branching on the stored
/// sample type.
fn decode_as_f32(decoded: &DecodedPixelData<'_>) -> Result<ArrayD<f32>, RenderError> {
    let bits_allocated = decoded.bits_allocated();

    let buffer = if decoded.pixel_representation() == PixelRepresentation::Unsigned {
        if bits_allocated <= 8 {
            decoded
                .to_ndarray::<u8>()
                .map_err(|e| RenderError::Convert(e.to_string()))?
                .mapv(|v| v as f32)
                .into_dyn()
        } else if bits_allocated <= 16 {
            decoded
                .to_ndarray::<u16>()
                .map_err(|e| RenderError::Convert(e.to_string()))?
                .mapv(|v| v as f32)
                .into_dyn()
        } else {
            decoded
                .to_ndarray::<u32>()
                .map_err(|e| RenderError::Convert(e.to_string()))?
                .mapv(|v| v as f32)
                .into_dyn()
        }
    } else if bits_allocated <= 8 {
        decoded
            .to_ndarray::<i8>()
            .map_err(|e| RenderError::Convert(e.to_string()))?
            .mapv(|v| v as f32)
            .into_dyn()
    } else if bits_allocated <= 16 {
        decoded
            .to_ndarray::<i16>()
            .map_err(|e| RenderError::Convert(e.to_string()))?
            .mapv(|v| v as f32)
            .into_dyn()
    } else {
        decoded
            .to_ndarray::<i32>()
            .map_err(|e| RenderError::Convert(e.to_string()))?
            .mapv(|v| v as f32)
            .into_dyn()
    };

    Ok(buffer)
}

/// Clip to the window (when given) and linearly rescale to [0, 255] using the
/// post-clip min/max. A flat buffer rescales to uniform mid-gray instead of
/// dividing by zero.
fn normalize_to_u8(frame: &[f32], window: Option<(f64, f64)>) -> Vec<u8> {
    let clipped: Vec<f32> = match window {
        Some((center, width)) => {
            let lo = (center - width / 2.0) as f32;
            let hi = (center + width / 2.0) as f32;
            frame.iter().map(|v| v.clamp(lo, hi)).collect()
        }
        None => frame.to_vec(),
    };

    let min = clipped.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max = clipped.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

    if !(max > min) {
        return vec![128; clipped.len()];
    }

    let scale = 255.0 / (max - min);
    clipped
        .iter()
        .map(|v| ((v - min) * scale).round() as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowing_clips_before_rescaling() {
        let frame = [0.0, 75.0, 100.0, 125.0, 255.0];
        let pixels = normalize_to_u8(&frame, Some((100.0, 50.0)));
        // Clip to [75, 125] first, then rescale over that range.
        assert_eq!(pixels, vec![0, 0, 128, 255, 255]);
    }

    #[test]
    fn no_window_uses_observed_min_max() {
        let frame = [10.0, 20.0, 30.0];
        let pixels = normalize_to_u8(&frame, None);
        assert_eq!(pixels, vec![0, 128, 255]);
    }

    #[test]
    fn flat_buffer_renders_uniform_mid_gray() {
        let frame = [7.0; 6];
        let pixels = normalize_to_u8(&frame, None);
        assert_eq!(pixels, vec![128; 6]);
    }

    #[test]
    fn flat_buffer_after_clipping_is_also_degenerate() {
        // All values land on the same clip bound.
        let frame = [500.0, 600.0, 700.0];
        let pixels = normalize_to_u8(&frame, Some((100.0, 50.0)));
        assert_eq!(pixels, vec![128; 3]);
    }

    #[test]
    fn thumbnail_respects_the_bound_and_aspect_ratio() {
        let wide = DynamicImage::ImageLuma8(GrayImage::from_pixel(
            300,
            100,
            image::Luma([200u8]),
        ));
        let png = encode_png(&wide).expect("encode");

        let thumb_png = thumbnail_png(&png, THUMBNAIL_MAX).expect("thumbnail");
        let thumb = image::load_from_memory(&thumb_png).expect("load thumb");

        assert!(thumb.width() <= THUMBNAIL_MAX);
        assert!(thumb.height() <= THUMBNAIL_MAX);
        assert_eq!(thumb.width(), 128);
        let aspect = thumb.width() as f32 / thumb.height() as f32;
        assert!((aspect - 3.0).abs() < 0.15);
    }

    #[test]
    fn small_frames_are_not_upscaled() {
        let tiny =
            DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, image::Luma([10u8])));
        let png = encode_png(&tiny).expect("encode");
        let thumb_png = thumbnail_png(&png, THUMBNAIL_MAX).expect("thumbnail");
        let thumb = image::load_from_memory(&thumb_png).expect("load thumb");
        assert_eq!((thumb.width(), thumb.height()), (2, 2));
    }
}
