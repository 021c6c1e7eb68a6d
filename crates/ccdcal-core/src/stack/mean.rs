use ndarray::Array2;

use crate::error::Result;

use super::check_stack;

/// Combine planes by computing the mean at each pixel.
pub fn mean_stack(planes: &[Array2<f32>]) -> Result<Array2<f32>> {
    let (h, w) = check_stack(planes)?;
    let n = planes.len() as f32;

    let mut sum = Array2::<f32>::zeros((h, w));

    for plane in planes {
        sum += plane;
    }

    sum /= n;

    Ok(sum)
}
