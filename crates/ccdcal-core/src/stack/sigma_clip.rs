use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CLIP_ITERATIONS, DEFAULT_CLIP_SIGMA};
use crate::error::Result;

use super::median::median_of;
use super::reduce_stack;

/// Parameters for sigma-clipped median combination.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Maximum number of rejection passes (default: 5).
    pub iterations: usize,
    /// Samples further than `sigma` standard deviations from the median are
    /// rejected (default: 2.5).
    pub sigma: f32,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_CLIP_ITERATIONS,
            sigma: DEFAULT_CLIP_SIGMA,
        }
    }
}

/// Combine planes with a sigma-clipped median.
///
/// Per pixel: compute median and standard deviation of the surviving samples,
/// reject samples more than `sigma` standard deviations from the median, and
/// repeat until nothing changes or the pass limit is reached. The result is
/// the median of the survivors. Non-finite samples never survive.
pub fn sigma_clip_median_stack(
    planes: &[Array2<f32>],
    params: &SigmaClipParams,
) -> Result<Array2<f32>> {
    let sigma = params.sigma;
    let iterations = params.iterations;
    reduce_stack(planes, move |values| {
        clipped_median(values, sigma, iterations)
    })
}

/// Sigma-clipped median of one pixel's samples. `values` is used as scratch.
pub fn clipped_median(values: &mut [f32], sigma: f32, iterations: usize) -> f32 {
    // Survivors are kept compacted at the front of the buffer.
    let mut len = 0;
    for i in 0..values.len() {
        if values[i].is_finite() {
            values[len] = values[i];
            len += 1;
        }
    }
    if len == 0 {
        return f32::NAN;
    }

    let mut scratch = Vec::with_capacity(len);
    for _ in 0..iterations {
        scratch.clear();
        scratch.extend_from_slice(&values[..len]);
        let center = median_of(&mut scratch);
        let stddev = stddev(&values[..len]);
        if stddev < 1e-12 {
            break;
        }

        let limit = sigma * stddev;
        let before = len;
        let mut kept = 0;
        for i in 0..before {
            if (values[i] - center).abs() <= limit {
                values[kept] = values[i];
                kept += 1;
            }
        }
        if kept == 0 {
            // Everything rejected: keep the previous survivors.
            break;
        }
        len = kept;
        if len == before {
            break;
        }
    }

    median_of(&mut values[..len])
}

fn stddev(values: &[f32]) -> f32 {
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt() as f32
}
