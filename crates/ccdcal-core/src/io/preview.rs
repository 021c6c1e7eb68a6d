use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat, Luma};

use crate::consts::{PREVIEW_HIGH_PERCENTILE, PREVIEW_LOW_PERCENTILE};
use crate::error::Result;
use crate::frame::Frame;

/// Black and white points from percentiles of the finite pixels.
///
/// `low_percentile` and `high_percentile` are in [0.0, 1.0].
pub fn percentile_limits(frame: &Frame, low_percentile: f32, high_percentile: f32) -> (f32, f32) {
    let mut sorted: Vec<f32> = frame.data.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return (0.0, 1.0);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let lo_idx = ((n as f32 * low_percentile) as usize).min(n - 1);
    let hi_idx = ((n as f32 * high_percentile) as usize).min(n - 1);
    (sorted[lo_idx], sorted[hi_idx])
}

/// Save a stretched 8-bit grayscale PNG of a frame.
///
/// Row 0 of the frame is drawn at the bottom, the usual orientation for
/// astronomical images.
pub fn save_preview_png(frame: &Frame, path: &Path) -> Result<()> {
    let h = frame.height();
    let w = frame.width();
    let (black, white) = percentile_limits(frame, PREVIEW_LOW_PERCENTILE, PREVIEW_HIGH_PERCENTILE);
    let range = if (white - black).abs() < f32::EPSILON {
        1.0
    } else {
        white - black
    };

    let mut img = GrayImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let v = frame.data[[row, col]];
            let scaled = if v.is_finite() {
                ((v - black) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
            img.put_pixel(col as u32, (h - 1 - row) as u32, Luma([(scaled * 255.0) as u8]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// `masterbias.fits` -> `masterbias.png`
pub fn preview_path(fits_path: &Path) -> PathBuf {
    fits_path.with_extension("png")
}
