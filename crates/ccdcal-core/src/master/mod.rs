pub mod bias;
pub mod dark;
pub mod flat;
pub mod library;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::classify::FrameRole;
use crate::consts::LINEAGE_KEYWORD;
use crate::error::Result;
use crate::frame::{Frame, Header};
use crate::io::fits::{read_fits, FitsReader};
use crate::io::fits_writer::write_fits;
use crate::io::preview::{preview_path, save_preview_png};
use crate::lineage::FrameRecord;
use crate::pipeline::types::StageContext;

pub use bias::{build_master_bias, BiasMethod};
pub use dark::{build_master_dark, combine_darks, DarkMethod};
pub use flat::{
    build_master_flats, flat_file_names, normalize_by_mean, sanitize_filter, unique_flat_file_names,
};
pub use library::LibraryResolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterKind {
    Bias,
    Dark,
    Flat,
    FlatNormalized,
}

impl std::fmt::Display for MasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bias => write!(f, "master bias"),
            Self::Dark => write!(f, "master dark"),
            Self::Flat => write!(f, "master flat"),
            Self::FlatNormalized => write!(f, "normalized master flat"),
        }
    }
}

/// A reference frame on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct MasterFrame {
    pub kind: MasterKind,
    /// Set for flat kinds only.
    pub filter: Option<String>,
    /// Combination method recorded in the header, or `library`.
    pub method: String,
    pub path: PathBuf,
}

impl MasterFrame {
    pub fn load(&self) -> Result<Frame> {
        read_fits(&self.path)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Master flats of one filter.
#[derive(Clone, Debug, PartialEq)]
pub struct MasterFlat {
    /// Un-normalized master; library lookups may not find one.
    pub flat: Option<MasterFrame>,
    pub normalized: MasterFrame,
}

/// Master flats keyed by filter name.
pub type MasterFlatSet = BTreeMap<String, MasterFlat>;

/// Read every record whose role matches `role`. Unreadable files are logged
/// and skipped.
pub(crate) fn load_role_frames(
    records: &[FrameRecord],
    role: &FrameRole,
    ctx: &StageContext<'_>,
) -> Vec<(PathBuf, Frame)> {
    let mut frames = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let loaded = FitsReader::open(&record.path).and_then(|reader| {
            if ctx.classifier.is(&reader.header, role) {
                reader.read_frame().map(Some)
            } else {
                Ok(None)
            }
        });
        match loaded {
            Ok(Some(frame)) => frames.push((record.path.clone(), frame)),
            Ok(None) => {}
            Err(e) => {
                warn!(file = %record.path.display(), error = %e, "Skipping unreadable file");
                ctx.reporter
                    .log(&format!("Skipping {}: {e}", record.file_name()));
            }
        }
        ctx.reporter.advance(i + 1);
    }
    frames
}

/// Drop frames whose shape differs from the first one.
pub(crate) fn keep_matching_shapes(
    frames: Vec<(PathBuf, Frame)>,
    ctx: &StageContext<'_>,
) -> Vec<(PathBuf, Frame)> {
    let Some(expected) = frames.first().map(|(_, f)| f.shape()) else {
        return frames;
    };
    frames
        .into_iter()
        .filter(|(path, frame)| {
            let keep = frame.shape() == expected;
            if !keep {
                warn!(
                    file = %path.display(),
                    expected = ?expected,
                    found = ?frame.shape(),
                    "Dropping frame with mismatched shape"
                );
                ctx.reporter.log(&format!(
                    "Skipping {}: shape {:?} differs from {:?}",
                    display_name(path),
                    frame.shape(),
                    expected
                ));
            }
            keep
        })
        .collect()
}

/// Header of the first input, stripped of cards that describe an earlier
/// processing state.
pub(crate) fn base_header(first: &Header) -> Header {
    let mut header = first.clone();
    header.remove(LINEAGE_KEYWORD);
    for key in ["MB_FILE", "MD_FILE", "MF_FILE"] {
        header.remove(key);
    }
    header
}

/// Write a master into the working dir and copy it byte-for-byte into the
/// aux dir. Returns the working-dir path.
pub(crate) fn write_master(frame: &Frame, name: &str, ctx: &StageContext<'_>) -> Result<PathBuf> {
    let path = ctx.run.working_path(name);
    write_fits(frame, &path)?;

    let mirror = ctx.run.aux_dir.join(name);
    if mirror != path {
        fs::copy(&path, &mirror)?;
    }
    debug!(path = %path.display(), mirror = %mirror.display(), "Wrote master frame");

    if ctx.preview_masters {
        let png = preview_path(&mirror);
        if let Err(e) = save_preview_png(frame, &png) {
            warn!(file = %png.display(), error = %e, "Could not write preview");
        }
    }
    Ok(path)
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
