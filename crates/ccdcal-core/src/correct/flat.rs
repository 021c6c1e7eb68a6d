use std::collections::BTreeMap;

use tracing::warn;

use crate::classify::FrameRole;
use crate::error::{CalibError, Result};
use crate::frame::Frame;
use crate::lineage::{Correction, FrameRecord};
use crate::master::MasterFlatSet;
use crate::pipeline::types::{PipelineStage, StageContext, StageOutput};

use super::{apply_each, Action};

/// Divide every object frame by the normalized master flat of its filter.
///
/// Non-finite quotients become 0. Object frames whose filter has no master
/// are skipped; a master that cannot be read fails the frames that need it.
pub fn apply_flat(
    records: &[FrameRecord],
    masters: &MasterFlatSet,
    ctx: &StageContext<'_>,
) -> Result<StageOutput> {
    let mut loaded: BTreeMap<&str, std::result::Result<Frame, String>> = BTreeMap::new();
    for (filter, master) in masters {
        let frame = master.normalized.load().map_err(|e| {
            warn!(filter = %filter, error = %e, "Could not read normalized master flat");
            e.to_string()
        });
        loaded.insert(filter.as_str(), frame);
    }

    Ok(apply_each(
        records,
        PipelineStage::FlatCorrecting,
        Correction::Flat,
        ctx,
        |record, mut frame| {
            if !ctx.classifier.is(&frame.header, &FrameRole::Object) {
                return Ok(Action::Skip("not an object frame".into()));
            }

            let filter = ctx.classifier.filter(&frame.header);
            let (master, flat) = match (masters.get(&filter), loaded.get(filter.as_str())) {
                (Some(master), Some(Ok(flat))) => (master, flat),
                (_, Some(Err(e))) => {
                    return Err(CalibError::InvalidFits(format!(
                        "normalized master flat for filter {filter}: {e}"
                    )))
                }
                _ => {
                    warn!(file = %record.path.display(), filter = %filter, "No master flat for filter");
                    ctx.reporter.log(&format!(
                        "Skipping {}: no master flat for filter {filter}",
                        record.file_name()
                    ));
                    return Ok(Action::Skip(format!("no master flat for filter {filter}")));
                }
            };
            if frame.shape() != flat.shape() {
                return Err(CalibError::ShapeMismatch {
                    expected: flat.shape(),
                    found: frame.shape(),
                });
            }

            frame.data.zip_mut_with(&flat.data, |v, &f| {
                let q = *v / f;
                *v = if q.is_finite() { q } else { 0.0 };
            });

            let master_name = master.normalized.file_name();
            frame
                .header
                .set_with_comment("MF_FILE", master_name.as_str(), Some("normalized master flat applied"));
            frame.header.set("MF_METH", master.normalized.method.as_str());
            frame
                .header
                .add_history(format!("Flat fielded using {master_name}"));
            Ok(Action::Apply(frame))
        },
    ))
}
