use std::fmt;

use ndarray::Array2;
use tracing::{info, warn};

use crate::classify::FrameRole;
use crate::consts::MASTER_DARK_NAME;
use crate::error::{CalibError, Result};
use crate::frame::{Frame, Header};
use crate::lineage::FrameRecord;
use crate::pipeline::config::DarkConfig;
use crate::pipeline::types::StageContext;
use crate::stack::{mean_stack, median_stack};

use super::library::LibraryResolver;
use super::{
    base_header, display_name, keep_matching_shapes, load_role_frames, write_master, MasterFrame,
    MasterKind,
};

/// Card marking a master dark as a per-second rate.
pub const PER_SECOND_KEYWORD: &str = "MD_PERS";
/// Long form of the same flag, accepted on read.
pub const PER_SECOND_KEYWORD_LONG: &str = "MD_PERSEC";

/// How dark frames are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DarkMethod {
    /// Divide each frame by its exposure, then median.
    ScaledExposureMedian,
    /// Divide each frame by its exposure, then mean.
    ScaledExposureAverage,
    /// Plain median of equal-exposure frames.
    Median,
}

impl DarkMethod {
    /// Parse a configured method name. Unknown names fall back to the
    /// scaled-exposure median.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "scaledexposuremedian" => Self::ScaledExposureMedian,
            "scaledexposureaverage" | "scaledexposuremean" => Self::ScaledExposureAverage,
            "median" => Self::Median,
            _ => {
                warn!(method = name, "Unknown dark method, using ScaledExposureMedian");
                Self::ScaledExposureMedian
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ScaledExposureMedian => "ScaledExposureMedian",
            Self::ScaledExposureAverage => "ScaledExposureAverage",
            Self::Median => "Median",
        }
    }

    /// True when the combined master is a rate in ADU per second.
    pub fn is_per_second(self) -> bool {
        !matches!(self, Self::Median)
    }
}

impl fmt::Display for DarkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Combine dark planes. Scaled methods divide each plane by its exposure
/// time first; `exposures` must have one entry per plane.
pub fn combine_darks(
    mut planes: Vec<Array2<f32>>,
    exposures: &[f64],
    method: DarkMethod,
) -> Result<Array2<f32>> {
    if method.is_per_second() {
        for (plane, &t) in planes.iter_mut().zip(exposures) {
            plane.mapv_inplace(|v| (v as f64 / t) as f32);
        }
    }
    match method {
        DarkMethod::ScaledExposureMedian | DarkMethod::Median => median_stack(&planes),
        DarkMethod::ScaledExposureAverage => mean_stack(&planes),
    }
}

/// Whether a master dark header marks a per-second rate.
pub fn is_per_second_master(header: &Header) -> bool {
    header
        .get_bool(PER_SECOND_KEYWORD)
        .or_else(|| header.get_bool(PER_SECOND_KEYWORD_LONG))
        .unwrap_or(false)
}

/// Build `masterdark.fits` from the dark frames among `records`, or return
/// the library master when library mode is on.
pub fn build_master_dark(
    records: &[FrameRecord],
    config: &DarkConfig,
    ctx: &StageContext<'_>,
) -> Result<MasterFrame> {
    if config.use_library {
        let master = LibraryResolver::new(ctx.run.library_locations())
            .resolve(MasterKind::Dark, &config.library_name)?;
        ctx.reporter
            .log(&format!("Using library master dark {}", master.path.display()));
        return Ok(master);
    }

    let method = DarkMethod::from_name(&config.method);
    let frames = keep_matching_shapes(load_role_frames(records, &FrameRole::Dark, ctx), ctx);
    if frames.is_empty() {
        return Err(CalibError::NoFramesFound {
            role: "dark".into(),
        });
    }

    let n = frames.len();
    info!(count = n, method = %method, "Combining dark frames");
    ctx.reporter
        .log(&format!("Combining {n} dark frames ({method})"));

    let exposures: Vec<f64> = frames
        .iter()
        .map(|(path, frame)| match ctx.classifier.exposure(&frame.header) {
            Some(t) if t > 0.0 => t,
            other => {
                if method.is_per_second() {
                    warn!(
                        file = %path.display(),
                        exposure = ?other,
                        "Dark has no usable exposure time, assuming 1 s"
                    );
                    ctx.reporter.log(&format!(
                        "{}: no usable exposure time, assuming 1 s",
                        display_name(path)
                    ));
                }
                1.0
            }
        })
        .collect();

    let mut header = base_header(&frames[0].1.header);
    let planes: Vec<Array2<f32>> = frames.into_iter().map(|(_, f)| f.data).collect();
    let data = combine_darks(planes, &exposures, method)?;

    header.set_with_comment("MD_NFRM", n, Some("number of combined dark frames"));
    header.set_with_comment("MD_METH", method.name(), Some("dark combination method"));
    header.set_with_comment(
        PER_SECOND_KEYWORD,
        method.is_per_second(),
        Some("master is a per-second rate"),
    );
    if method.is_per_second() {
        header.set(ctx.classifier.exposure_keyword(), 1.0f64);
    }
    header.add_history(format!("Master dark combined from {n} frames ({method})"));

    let path = write_master(&Frame::with_header(data, header), MASTER_DARK_NAME, ctx)?;
    ctx.reporter
        .log(&format!("Master dark written to {}", path.display()));

    Ok(MasterFrame {
        kind: MasterKind::Dark,
        filter: None,
        method: method.name().into(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_median_is_not_a_rate() {
        assert!(DarkMethod::ScaledExposureMedian.is_per_second());
        assert!(DarkMethod::ScaledExposureAverage.is_per_second());
        assert!(!DarkMethod::Median.is_per_second());
        assert_eq!(DarkMethod::from_name("nonsense"), DarkMethod::ScaledExposureMedian);
    }

    #[test]
    fn long_flag_is_accepted() {
        let mut h = Header::new();
        h.set(PER_SECOND_KEYWORD_LONG, true);
        assert!(is_per_second_master(&h));
        assert!(!is_per_second_master(&Header::new()));
    }
}
