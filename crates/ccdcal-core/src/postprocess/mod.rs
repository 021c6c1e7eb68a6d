pub mod background;
pub mod box_filter;
pub mod cosmetic;
pub mod overscan;

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::correct::Action;
use crate::error::Result;
use crate::frame::Frame;
use crate::io::fits::read_fits;
use crate::io::fits_writer::write_fits;
use crate::pipeline::types::{FileOutcome, PipelineStage, StageContext, StageReport};

pub use background::{apply_background, subtract_background};
pub use box_filter::box_average;
pub use cosmetic::{apply_cosmetic, repair_bad_pixels, BadPixelMask};
pub use overscan::{apply_overscan, subtract_overscan, OverscanMode, OverscanRegion};

/// Rewrite each file in place with the frame `update` returns. Failures are
/// recorded per file.
pub(crate) fn update_each<F>(
    paths: &[PathBuf],
    stage: PipelineStage,
    ctx: &StageContext<'_>,
    mut update: F,
) -> StageReport
where
    F: FnMut(Frame) -> Result<Action>,
{
    let mut report = StageReport::new(stage);
    for (i, path) in paths.iter().enumerate() {
        let result = read_fits(path).and_then(|frame| match update(frame)? {
            Action::Apply(frame) => {
                write_fits(&frame, path)?;
                Ok(FileOutcome::Written(path.clone()))
            }
            Action::Skip(reason) | Action::PassThrough(reason) => Ok(FileOutcome::Skipped(reason)),
        });
        let outcome = match result {
            Ok(outcome) => {
                debug!(file = %path.display(), outcome = ?outcome, "Updated");
                outcome
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Update failed");
                ctx.reporter.log(&format!(
                    "Error processing {}: {e}",
                    crate::master::display_name(path)
                ));
                FileOutcome::Failed(e.to_string())
            }
        };
        report.record(path, outcome);
        ctx.reporter.advance(i + 1);
    }
    ctx.reporter.log(&format!(
        "{stage}: {} updated, {} skipped, {} failed",
        report.written(),
        report.skipped(),
        report.failed()
    ));
    report
}
