use std::fmt;

use ndarray::Array2;
use tracing::{info, warn};

use crate::classify::FrameRole;
use crate::consts::MASTER_BIAS_NAME;
use crate::error::{CalibError, Result};
use crate::frame::Frame;
use crate::lineage::FrameRecord;
use crate::pipeline::config::BiasConfig;
use crate::pipeline::types::StageContext;
use crate::stack::{mean_stack, median_stack, sigma_clip_median_stack, SigmaClipParams};

use super::library::LibraryResolver;
use super::{base_header, keep_matching_shapes, load_role_frames, write_master, MasterFrame, MasterKind};

/// How bias frames are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiasMethod {
    MedianSigmaClipped,
    Median,
    Mean,
}

impl BiasMethod {
    /// Parse a configured method name. Unknown names fall back to the
    /// sigma-clipped median.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mediansigmaclipped" => Self::MedianSigmaClipped,
            "median" => Self::Median,
            "mean" | "average" => Self::Mean,
            _ => {
                warn!(method = name, "Unknown bias method, using MedianSigmaClipped");
                Self::MedianSigmaClipped
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MedianSigmaClipped => "MedianSigmaClipped",
            Self::Median => "Median",
            Self::Mean => "Mean",
        }
    }

    pub fn combine(self, planes: &[Array2<f32>], clip: &SigmaClipParams) -> Result<Array2<f32>> {
        match self {
            Self::MedianSigmaClipped => sigma_clip_median_stack(planes, clip),
            Self::Median => median_stack(planes),
            Self::Mean => mean_stack(planes),
        }
    }
}

impl fmt::Display for BiasMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build `masterbias.fits` from the bias frames among `records`, or return
/// the library master when library mode is on.
pub fn build_master_bias(
    records: &[FrameRecord],
    config: &BiasConfig,
    ctx: &StageContext<'_>,
) -> Result<MasterFrame> {
    if config.use_library {
        let master = LibraryResolver::new(ctx.run.library_locations())
            .resolve(MasterKind::Bias, &config.library_name)?;
        ctx.reporter
            .log(&format!("Using library master bias {}", master.path.display()));
        return Ok(master);
    }

    let method = BiasMethod::from_name(&config.method);
    let frames = keep_matching_shapes(load_role_frames(records, &FrameRole::Bias, ctx), ctx);
    if frames.is_empty() {
        return Err(CalibError::NoFramesFound {
            role: "bias".into(),
        });
    }

    let n = frames.len();
    info!(count = n, method = %method, "Combining bias frames");
    ctx.reporter
        .log(&format!("Combining {n} bias frames ({method})"));

    let mut header = base_header(&frames[0].1.header);
    let planes: Vec<Array2<f32>> = frames.into_iter().map(|(_, f)| f.data).collect();
    let clip = SigmaClipParams {
        iterations: config.iterations,
        sigma: config.sigma,
    };
    let data = method.combine(&planes, &clip)?;

    header.set_with_comment("MB_NFRM", n, Some("number of combined bias frames"));
    header.set_with_comment("MB_METH", method.name(), Some("bias combination method"));
    header.set_with_comment("MB_SIG", config.sigma, Some("clipping sigma"));
    header.add_history(format!("Master bias combined from {n} frames ({method})"));

    let path = write_master(&Frame::with_header(data, header), MASTER_BIAS_NAME, ctx)?;
    ctx.reporter
        .log(&format!("Master bias written to {}", path.display()));

    Ok(MasterFrame {
        kind: MasterKind::Bias,
        filter: None,
        method: method.name().into(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_are_lenient() {
        assert_eq!(BiasMethod::from_name("median"), BiasMethod::Median);
        assert_eq!(BiasMethod::from_name("Average"), BiasMethod::Mean);
        assert_eq!(BiasMethod::from_name("  MEAN "), BiasMethod::Mean);
        assert_eq!(BiasMethod::from_name("bogus"), BiasMethod::MedianSigmaClipped);
    }
}
