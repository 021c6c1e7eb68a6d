use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ndarray::{s, Array2};
use tracing::{info, warn};

use crate::lineage::{Correction, FrameRecord};
use crate::pipeline::config::OverscanConfig;
use crate::pipeline::types::{PipelineStage, StageContext, StageOutput, StageReport};
use crate::stack::median::median_of;

use crate::correct::{apply_each, Action};

/// Overscan strip as `x1:x2,y1:y2`: zero-based, end-exclusive pixel ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverscanRegion {
    pub x1: i64,
    pub x2: i64,
    pub y1: i64,
    pub y2: i64,
}

impl OverscanRegion {
    /// Column and row ranges clipped to a `(height, width)` image, or `None`
    /// when nothing is left.
    pub fn clamped(&self, shape: (usize, usize)) -> Option<(Range<usize>, Range<usize>)> {
        let (h, w) = shape;
        let clip = |v: i64, max: usize| v.clamp(0, max as i64) as usize;
        let (x1, x2) = (clip(self.x1, w), clip(self.x2, w));
        let (y1, y2) = (clip(self.y1, h), clip(self.y2, h));
        if x1 >= x2 || y1 >= y2 {
            None
        } else {
            Some((x1..x2, y1..y2))
        }
    }
}

impl FromStr for OverscanRegion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || format!("invalid overscan region '{s}', expected 'x1:x2,y1:y2'");
        let (xpart, ypart) = s.split_once(',').ok_or_else(err)?;
        let range = |part: &str| -> Result<(i64, i64), String> {
            let (a, b) = part.split_once(':').ok_or_else(err)?;
            let a = a.trim().parse().map_err(|_| err())?;
            let b = b.trim().parse().map_err(|_| err())?;
            Ok((a, b))
        };
        let (x1, x2) = range(xpart)?;
        let (y1, y2) = range(ypart)?;
        Ok(Self { x1, x2, y1, y2 })
    }
}

impl fmt::Display for OverscanRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}:{}", self.x1, self.x2, self.y1, self.y2)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverscanMode {
    /// One median per row, subtracted along that row.
    Row,
    /// One median per column, subtracted down that column.
    Column,
}

impl OverscanMode {
    /// Unknown modes fall back to `Row`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "row" => Self::Row,
            "column" => Self::Column,
            _ => {
                warn!(mode = name, "Unknown overscan mode, using row");
                Self::Row
            }
        }
    }
}

impl fmt::Display for OverscanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row => write!(f, "row"),
            Self::Column => write!(f, "column"),
        }
    }
}

/// Subtract the overscan level in place over the full frame. Row mode needs
/// a region spanning every row, column mode one spanning every column.
/// Returns false, without touching the data, when the region is empty after
/// clipping or does not span that axis.
pub fn subtract_overscan(data: &mut Array2<f32>, region: &OverscanRegion, mode: OverscanMode) -> bool {
    let (h, w) = data.dim();
    let Some((xs, ys)) = region.clamped((h, w)) else {
        return false;
    };
    let spans_axis = match mode {
        OverscanMode::Row => ys == (0..h),
        OverscanMode::Column => xs == (0..w),
    };
    if !spans_axis {
        return false;
    }

    let strip = data.slice(s![ys.clone(), xs.clone()]).to_owned();
    match mode {
        OverscanMode::Row => {
            for (i, y) in ys.enumerate() {
                let mut values = strip.row(i).to_vec();
                let level = median_of(&mut values);
                data.row_mut(y).mapv_inplace(|v| v - level);
            }
        }
        OverscanMode::Column => {
            for (i, x) in xs.enumerate() {
                let mut values = strip.column(i).to_vec();
                let level = median_of(&mut values);
                data.column_mut(x).mapv_inplace(|v| v - level);
            }
        }
    }
    true
}

/// Overscan stage. An unparsable region disables the stage and every record
/// passes through unchanged.
pub fn apply_overscan(
    records: &[FrameRecord],
    config: &OverscanConfig,
    ctx: &StageContext<'_>,
) -> StageOutput {
    let region = match config.region.parse::<OverscanRegion>() {
        Ok(region) => region,
        Err(e) => {
            warn!(error = %e, "Overscan disabled");
            ctx.reporter
                .log(&format!("Overscan skipped: {e}"));
            return StageOutput {
                records: records.to_vec(),
                report: StageReport::new(PipelineStage::Overscanning),
            };
        }
    };
    let mode = OverscanMode::from_name(&config.mode);
    info!(region = %region, mode = %mode, "Overscan correction");
    ctx.reporter
        .log(&format!("Overscan region {region}, mode {mode}"));

    apply_each(
        records,
        PipelineStage::Overscanning,
        Correction::Overscan,
        ctx,
        |record, mut frame| {
            if !subtract_overscan(&mut frame.data, &region, mode) {
                warn!(file = %record.path.display(), "Overscan region does not fit this frame");
                ctx.reporter.log(&format!(
                    "{}: overscan region {region} is empty or does not span the frame in {mode} mode, left unchanged",
                    record.file_name()
                ));
                return Ok(Action::PassThrough("overscan region does not fit".into()));
            }
            frame
                .header
                .add_history(format!("Overscan subtracted, region {region}, {mode} mode"));
            Ok(Action::Apply(frame))
        },
    )
}
