use ndarray::Array2;

use crate::error::Result;

use super::reduce_stack;

/// Combine planes by taking the median at each pixel position.
///
/// Uses `select_nth_unstable` for O(n) median without full sort.
pub fn median_stack(planes: &[Array2<f32>]) -> Result<Array2<f32>> {
    reduce_stack(planes, median_of)
}

/// Median of a scratch buffer (reordered in place). Even counts average the
/// two middle samples. Empty input yields NaN.
pub fn median_of(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        f32::NAN
    } else if n == 1 {
        values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
    } else {
        let mid = n / 2;
        values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (values[mid - 1] + values[mid]) / 2.0
    }
}
