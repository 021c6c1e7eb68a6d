use std::path::PathBuf;

use ndarray::Array2;
use tracing::info;

use crate::consts::MIN_BACKGROUND_BOX;
use crate::correct::Action;
use crate::pipeline::config::BackgroundConfig;
use crate::pipeline::types::{PipelineStage, StageContext, StageReport};

use super::box_filter::box_average;
use super::update_each;

/// Subtract a box-averaged background estimate in place. `box_size` is
/// raised to at least 3.
pub fn subtract_background(data: &mut Array2<f32>, box_size: usize) {
    let background = box_average(data, box_size.max(MIN_BACKGROUND_BOX));
    data.zip_mut_with(&background, |v, &b| {
        if b.is_finite() {
            *v -= b;
        }
    });
}

/// Background stage over the published result files.
pub fn apply_background(
    paths: &[PathBuf],
    config: &BackgroundConfig,
    ctx: &StageContext<'_>,
) -> StageReport {
    let box_size = config.box_size.max(MIN_BACKGROUND_BOX);
    info!(box_size, "Background subtraction");
    ctx.reporter
        .log(&format!("Subtracting background, box size {box_size} px"));

    update_each(paths, PipelineStage::Background, ctx, |mut frame| {
        subtract_background(&mut frame.data, box_size);
        frame
            .header
            .add_history(format!("Background subtracted, box size {box_size}"));
        Ok(Action::Apply(frame))
    })
}
