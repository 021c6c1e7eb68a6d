pub mod mean;
pub mod median;
pub mod sigma_clip;

use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{CalibError, Result};

pub use mean::mean_stack;
pub use median::median_stack;
pub use sigma_clip::{sigma_clip_median_stack, SigmaClipParams};

/// Check that the stack is non-empty and every plane has the same shape.
/// Returns (height, width).
pub(crate) fn check_stack(planes: &[Array2<f32>]) -> Result<(usize, usize)> {
    let first = planes.first().ok_or(CalibError::EmptySequence)?;
    let dim = first.dim();
    for plane in &planes[1..] {
        if plane.dim() != dim {
            return Err(CalibError::ShapeMismatch {
                expected: dim,
                found: plane.dim(),
            });
        }
    }
    Ok(dim)
}

/// Reduce the stack along its leading axis, one pixel at a time.
///
/// `reduce` receives the n samples of one pixel in a scratch buffer it may
/// reorder. Parallelizes at the row level for large frames; the result does
/// not depend on the path taken.
pub(crate) fn reduce_stack<F>(planes: &[Array2<f32>], reduce: F) -> Result<Array2<f32>>
where
    F: Fn(&mut [f32]) -> f32 + Sync,
{
    let (h, w) = check_stack(planes)?;
    let n = planes.len();

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut pixel_values = vec![0.0f32; n];
                let mut row_result = vec![0.0f32; w];
                for (col, result) in row_result.iter_mut().enumerate() {
                    for (i, plane) in planes.iter().enumerate() {
                        pixel_values[i] = plane[[row, col]];
                    }
                    *result = reduce(&mut pixel_values);
                }
                row_result
            })
            .collect();

        let mut result = Array2::<f32>::zeros((h, w));
        for (row, row_data) in rows.into_iter().enumerate() {
            for (col, val) in row_data.into_iter().enumerate() {
                result[[row, col]] = val;
            }
        }
        Ok(result)
    } else {
        let mut result = Array2::<f32>::zeros((h, w));
        let mut pixel_values = vec![0.0f32; n];
        for row in 0..h {
            for col in 0..w {
                for (i, plane) in planes.iter().enumerate() {
                    pixel_values[i] = plane[[row, col]];
                }
                result[[row, col]] = reduce(&mut pixel_values);
            }
        }
        Ok(result)
    }
}
