use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Mean over a square window centred on each pixel, with the image edges
/// extended by repeating the border pixels.
///
/// The window is `2 * (size / 2) + 1` pixels wide, so even sizes round up.
/// Non-finite samples are left out and the mean is taken over the remaining
/// ones; a window with no finite sample yields NaN.
pub fn box_average(data: &Array2<f32>, size: usize) -> Array2<f32> {
    let radius = size / 2;
    let values = data.mapv(|v| if v.is_finite() { v as f64 } else { 0.0 });
    let weights = data.mapv(|v| if v.is_finite() { 1.0 } else { 0.0 });

    let sums = window_sum_2d(values.view(), radius);
    let counts = window_sum_2d(weights.view(), radius);

    Zip::from(&sums).and(&counts).map_collect(|&s, &c| {
        if c > 0.0 {
            (s / c) as f32
        } else {
            f32::NAN
        }
    })
}

fn window_sum_2d(data: ArrayView2<f64>, radius: usize) -> Array2<f64> {
    let rows = sum_along_rows(data, radius);
    // Columns of the row pass are the rows of its transpose.
    sum_along_rows(rows.t(), radius).reversed_axes()
}

fn sum_along_rows(data: ArrayView2<f64>, radius: usize) -> Array2<f64> {
    let (h, w) = data.dim();
    let line = |row: usize| -> Vec<f64> {
        let src = data.row(row).to_vec();
        let mut out = vec![0.0f64; w];
        window_sums(&src, radius, &mut out);
        out
    };

    let rows: Vec<Vec<f64>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(line).collect()
    } else {
        (0..h).map(line).collect()
    };

    let mut result = Array2::<f64>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

/// Running sum over `[i - radius, i + radius]` with clamped indices.
fn window_sums(line: &[f64], radius: usize, out: &mut [f64]) {
    if line.is_empty() {
        return;
    }
    let n = line.len() as isize;
    let r = radius as isize;
    let at = |i: isize| line[i.clamp(0, n - 1) as usize];

    let mut sum: f64 = (-r..=r).map(at).sum();
    for (i, o) in out.iter_mut().enumerate() {
        let i = i as isize;
        *o = sum;
        sum += at(i + r + 1) - at(i - r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_image_is_unchanged() {
        let data = Array2::from_elem((5, 7), 3.5f32);
        let out = box_average(&data, 3);
        assert!(out.iter().all(|&v| (v - 3.5).abs() < 1e-6));
    }

    #[test]
    fn edges_are_extended() {
        // 1-D ramp 0,1,2: the first window sees 0,0,1.
        let mut out = [0.0; 3];
        window_sums(&[0.0, 1.0, 2.0], 1, &mut out);
        assert_eq!(out, [1.0, 3.0, 5.0]);
    }

    #[test]
    fn nan_samples_are_ignored() {
        let mut data = Array2::from_elem((3, 3), 2.0f32);
        data[[1, 1]] = f32::NAN;
        let out = box_average(&data, 3);
        assert!((out[[1, 1]] - 2.0).abs() < 1e-6);
    }
}
