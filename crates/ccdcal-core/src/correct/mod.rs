pub mod bias;
pub mod dark;
pub mod flat;

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::consts::LINEAGE_KEYWORD;
use crate::error::Result;
use crate::frame::Frame;
use crate::io::fits::read_fits;
use crate::io::fits_writer::write_fits;
use crate::lineage::{Correction, FrameRecord};
use crate::pipeline::types::{FileOutcome, PipelineStage, StageContext, StageOutput, StageReport};

pub use bias::apply_bias;
pub use dark::apply_dark;
pub use flat::apply_flat;

/// What a correction decided for one frame.
pub(crate) enum Action {
    /// Write the corrected frame.
    Apply(Frame),
    /// Leave the frame out of the output set.
    Skip(String),
    /// Keep the input record in the output set without writing anything.
    PassThrough(String),
}

/// Run `correct` over every record in sorted order and write the results
/// into the working dir under their derived names.
///
/// Each file is handled on its own: read errors and correction errors are
/// recorded as failures and the batch goes on. Records that already carry
/// `step` pass through unread. An output name already written in this stage
/// fails the later file. The returned record set holds the written frames
/// plus any passed through unchanged.
pub(crate) fn apply_each<F>(
    records: &[FrameRecord],
    stage: PipelineStage,
    step: Correction,
    ctx: &StageContext<'_>,
    mut correct: F,
) -> StageOutput
where
    F: FnMut(&FrameRecord, Frame) -> Result<Action>,
{
    let mut sorted: Vec<&FrameRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut report = StageReport::new(stage);
    let mut output = Vec::new();
    let mut written: HashSet<PathBuf> = HashSet::new();

    for (i, record) in sorted.into_iter().enumerate() {
        let name = record.file_name();
        if record.lineage.contains(step) {
            debug!(file = %record.path.display(), step = %step, "Already corrected");
            output.push(record.clone());
            report.record(&record.path, FileOutcome::Skipped(format!("already {step}-corrected")));
            ctx.reporter.advance(i + 1);
            continue;
        }
        let derived = record.derive(step, &ctx.run.working_dir);
        let outcome = match read_fits(&record.path).and_then(|frame| correct(record, frame)) {
            Ok(Action::Apply(_)) if written.contains(&derived.path) => {
                warn!(file = %record.path.display(), output = %derived.path.display(), "Output name already used");
                ctx.reporter.log(&format!(
                    "Error processing {name}: output {} already written by another input",
                    derived.file_name()
                ));
                FileOutcome::Failed(format!("output {} already written", derived.file_name()))
            }
            Ok(Action::Apply(mut frame)) => {
                frame
                    .header
                    .set_with_comment(LINEAGE_KEYWORD, derived.lineage.letters(), Some("calibration steps applied"));
                match write_fits(&frame, &derived.path) {
                    Ok(()) => {
                        debug!(input = %record.path.display(), output = %derived.path.display(), "Wrote corrected frame");
                        let path = derived.path.clone();
                        written.insert(path.clone());
                        output.push(derived);
                        FileOutcome::Written(path)
                    }
                    Err(e) => {
                        warn!(file = %derived.path.display(), error = %e, "Could not write corrected frame");
                        ctx.reporter.log(&format!("Error writing {}: {e}", derived.file_name()));
                        FileOutcome::Failed(e.to_string())
                    }
                }
            }
            Ok(Action::Skip(reason)) => {
                debug!(file = %record.path.display(), reason = %reason, "Skipped");
                FileOutcome::Skipped(reason)
            }
            Ok(Action::PassThrough(reason)) => {
                output.push(record.clone());
                FileOutcome::Skipped(reason)
            }
            Err(e) => {
                warn!(file = %record.path.display(), error = %e, "Correction failed");
                ctx.reporter.log(&format!("Error processing {name}: {e}"));
                FileOutcome::Failed(e.to_string())
            }
        };
        report.record(&record.path, outcome);
        ctx.reporter.advance(i + 1);
    }

    ctx.reporter.log(&format!(
        "{stage}: {} written, {} skipped, {} failed",
        report.written(),
        report.skipped(),
        report.failed()
    ));
    StageOutput {
        records: output,
        report,
    }
}
