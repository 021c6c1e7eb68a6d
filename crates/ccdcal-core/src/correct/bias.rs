use crate::classify::FrameRole;
use crate::error::{CalibError, Result};
use crate::lineage::{Correction, FrameRecord};
use crate::master::MasterFrame;
use crate::pipeline::types::{PipelineStage, StageContext, StageOutput};

use super::{apply_each, Action};

/// Subtract the master bias from every non-bias frame.
///
/// Fails only when the master itself cannot be read.
pub fn apply_bias(
    records: &[FrameRecord],
    master: &MasterFrame,
    ctx: &StageContext<'_>,
) -> Result<StageOutput> {
    let master_frame = master.load()?;
    let master_name = master.file_name();

    Ok(apply_each(
        records,
        PipelineStage::BiasCorrecting,
        Correction::Bias,
        ctx,
        |_, mut frame| {
            if ctx.classifier.is(&frame.header, &FrameRole::Bias) {
                return Ok(Action::Skip("bias frame".into()));
            }
            if frame.shape() != master_frame.shape() {
                return Err(CalibError::ShapeMismatch {
                    expected: master_frame.shape(),
                    found: frame.shape(),
                });
            }

            frame.data -= &master_frame.data;
            frame
                .header
                .set_with_comment("MB_FILE", master_name.as_str(), Some("master bias subtracted"));
            frame.header.set("MB_METH", master.method.as_str());
            frame
                .header
                .add_history(format!("Bias subtracted using {master_name}"));
            Ok(Action::Apply(frame))
        },
    ))
}
