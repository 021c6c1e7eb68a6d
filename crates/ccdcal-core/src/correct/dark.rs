use tracing::warn;

use crate::classify::FrameRole;
use crate::error::{CalibError, Result};
use crate::lineage::{Correction, FrameRecord};
use crate::master::dark::is_per_second_master;
use crate::master::MasterFrame;
use crate::pipeline::types::{PipelineStage, StageContext, StageOutput};

use super::{apply_each, Action};

/// Subtract the master dark from every frame that is neither bias nor dark.
///
/// A per-second master is scaled by each frame's exposure time; otherwise it
/// is subtracted as is. Frames without a positive exposure time are skipped.
pub fn apply_dark(
    records: &[FrameRecord],
    master: &MasterFrame,
    ctx: &StageContext<'_>,
) -> Result<StageOutput> {
    let master_frame = master.load()?;
    let master_name = master.file_name();
    let per_second = is_per_second_master(&master_frame.header);

    Ok(apply_each(
        records,
        PipelineStage::DarkCorrecting,
        Correction::Dark,
        ctx,
        |record, mut frame| {
            match ctx.classifier.role(&frame.header) {
                FrameRole::Bias => return Ok(Action::Skip("bias frame".into())),
                FrameRole::Dark => return Ok(Action::Skip("dark frame".into())),
                _ => {}
            }

            let exposure = match ctx.classifier.exposure(&frame.header) {
                Some(t) if t > 0.0 => t,
                other => {
                    warn!(file = %record.path.display(), exposure = ?other, "No usable exposure time");
                    ctx.reporter.log(&format!(
                        "Skipping {}: no usable exposure time",
                        record.file_name()
                    ));
                    return Ok(Action::Skip("no usable exposure time".into()));
                }
            };
            if frame.shape() != master_frame.shape() {
                return Err(CalibError::ShapeMismatch {
                    expected: master_frame.shape(),
                    found: frame.shape(),
                });
            }

            if per_second {
                let t = exposure as f32;
                frame
                    .data
                    .zip_mut_with(&master_frame.data, |v, &d| *v -= t * d);
            } else {
                frame.data -= &master_frame.data;
            }

            frame
                .header
                .set_with_comment("MD_FILE", master_name.as_str(), Some("master dark subtracted"));
            frame.header.set("MD_METH", master.method.as_str());
            frame.header.add_history(if per_second {
                format!("Dark subtracted using {master_name} scaled to {exposure} s")
            } else {
                format!("Dark subtracted using {master_name}")
            });
            Ok(Action::Apply(frame))
        },
    ))
}
