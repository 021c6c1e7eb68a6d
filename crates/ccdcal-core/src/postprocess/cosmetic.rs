use std::path::{Path, PathBuf};

use ndarray::{Array2, Zip};
use tracing::{info, warn};

use crate::error::Result;
use crate::io::fits::read_fits;
use crate::pipeline::config::CosmeticConfig;
use crate::pipeline::types::{PipelineStage, StageContext, StageReport};

use super::box_filter::box_average;
use super::update_each;
use crate::correct::Action;

/// Boolean map of pixels to repair.
#[derive(Clone, Debug)]
pub struct BadPixelMask {
    pub mask: Array2<bool>,
}

impl BadPixelMask {
    /// Non-zero pixels of a FITS image are bad.
    pub fn load(path: &Path) -> Result<Self> {
        let frame = read_fits(path)?;
        Ok(Self {
            mask: frame.data.mapv(|v| v != 0.0),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&b| b).count()
    }
}

/// Replace masked pixels by the box average of their unmasked neighbours.
/// Pixels whose whole window is masked keep their value. `mask` must match
/// the data shape.
pub fn repair_bad_pixels(data: &mut Array2<f32>, mask: &Array2<bool>, box_size: usize) {
    let mut good = data.clone();
    Zip::from(&mut good).and(mask).for_each(|v, &bad| {
        if bad {
            *v = f32::NAN;
        }
    });
    let smoothed = box_average(&good, box_size);
    Zip::from(data)
        .and(mask)
        .and(&smoothed)
        .for_each(|v, &bad, &s| {
            if bad && s.is_finite() {
                *v = s;
            }
        });
}

/// Cosmetic stage over the published result files. A missing or unreadable
/// mask disables the stage.
pub fn apply_cosmetic(paths: &[PathBuf], config: &CosmeticConfig, ctx: &StageContext<'_>) -> StageReport {
    let disabled = |reason: String| {
        warn!(reason = %reason, "Cosmetic correction disabled");
        ctx.reporter
            .log(&format!("Cosmetic correction skipped: {reason}"));
        StageReport::new(PipelineStage::Cosmetic)
    };

    if config.bad_pixel_mask.as_os_str().is_empty() {
        return disabled("no bad pixel mask configured".into());
    }
    if !config.bad_pixel_mask.is_file() {
        return disabled(format!(
            "bad pixel mask {} not found",
            config.bad_pixel_mask.display()
        ));
    }
    let mask = match BadPixelMask::load(&config.bad_pixel_mask) {
        Ok(mask) => mask,
        Err(e) => return disabled(format!("cannot read bad pixel mask: {e}")),
    };
    info!(bad_pixels = mask.count(), "Cosmetic correction");
    ctx.reporter.log(&format!(
        "Repairing {} bad pixels from {}",
        mask.count(),
        config.bad_pixel_mask.display()
    ));

    update_each(paths, PipelineStage::Cosmetic, ctx, |mut frame| {
        if frame.shape() != mask.shape() {
            let reason = format!(
                "mask shape {:?} differs from image shape {:?}",
                mask.shape(),
                frame.shape()
            );
            ctx.reporter.log(&format!("Cosmetic: {reason}; file skipped"));
            return Ok(Action::Skip(reason));
        }
        repair_bad_pixels(&mut frame.data, &mask.mask, config.box_size);
        frame
            .header
            .add_history(format!("Bad pixels repaired ({} masked)", mask.count()));
        Ok(Action::Apply(frame))
    })
}
