use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use ndarray::Array2;
use tracing::{info, warn};

use crate::classify::FrameRole;
use crate::error::Result;
use crate::frame::{Frame, Header};
use crate::io::fits::FitsReader;
use crate::lineage::FrameRecord;
use crate::pipeline::config::FlatConfig;
use crate::pipeline::types::StageContext;
use crate::stack::median_stack;

use super::library::LibraryResolver;
use super::{
    base_header, display_name, keep_matching_shapes, write_master, MasterFlat, MasterFlatSet,
    MasterFrame, MasterKind,
};

/// File-name suffix of normalized master flats.
pub const NORMALIZED_SUFFIX: &str = "_norm.fits";

const FLAT_METHOD: &str = "Median";

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_filter(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `(masterflat_<filter>.fits, masterflat_<filter>_norm.fits)`
pub fn flat_file_names(filter: &str) -> (String, String) {
    names_for_safe(&sanitize_filter(filter))
}

fn names_for_safe(safe: &str) -> (String, String) {
    (
        format!("masterflat_{safe}.fits"),
        format!("masterflat_{safe}{NORMALIZED_SUFFIX}"),
    )
}

/// File names for a set of filters, unique even when two filters sanitise
/// to the same string. Filters that are already file-safe keep their name;
/// the others get a numeric suffix (`B_V_2`) on collision.
pub fn unique_flat_file_names<'a>(
    filters: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, (String, String)> {
    let filters: Vec<&str> = filters.into_iter().collect();
    let (exact, renamed): (Vec<&str>, Vec<&str>) =
        filters.into_iter().partition(|f| sanitize_filter(f) == *f);

    let mut taken = HashSet::new();
    let mut names = BTreeMap::new();
    for filter in exact.into_iter().chain(renamed) {
        let safe = sanitize_filter(filter);
        let mut candidate = safe.clone();
        let mut n = 1;
        while !taken.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{safe}_{n}");
        }
        if candidate != safe {
            warn!(filter, file_name = %candidate, "Filter name collides after sanitising");
        }
        names.insert(filter.to_string(), names_for_safe(&candidate));
    }
    names
}

/// Divide a plane by its own mean. Planes with a non-positive or non-finite
/// mean are returned unscaled.
pub fn normalize_by_mean(plane: &Array2<f32>) -> Array2<f32> {
    let mean = plane.iter().map(|&v| v as f64).sum::<f64>() / plane.len().max(1) as f64;
    if mean > 0.0 && mean.is_finite() {
        plane.mapv(|v| (v as f64 / mean) as f32)
    } else {
        plane.clone()
    }
}

/// Build a master flat and a normalized master flat per filter, or collect
/// them from the library when library mode is on.
///
/// Filters with fewer than `min_frames` accepted flats are skipped. An empty
/// result is not an error here; the flat applier then skips every frame.
pub fn build_master_flats(
    records: &[FrameRecord],
    config: &FlatConfig,
    ctx: &StageContext<'_>,
) -> Result<MasterFlatSet> {
    if config.use_library {
        let set = LibraryResolver::new(ctx.run.library_locations()).resolve_flats()?;
        for filter in set.keys() {
            ctx.reporter
                .log(&format!("Using library master flat for filter {filter}"));
        }
        return Ok(set);
    }

    let groups = select_flats(records, config, ctx);
    let file_names = unique_flat_file_names(groups.keys().map(String::as_str));
    let mut set = MasterFlatSet::new();

    for (filter, frames) in groups {
        let frames = if config.check_consistency {
            frames
        } else {
            keep_matching_shapes(frames, ctx)
        };
        if frames.len() < config.min_frames {
            warn!(
                filter = %filter,
                count = frames.len(),
                required = config.min_frames,
                "Not enough flats, skipping filter"
            );
            ctx.reporter.log(&format!(
                "Filter {filter}: {} flat(s), need {}; skipped",
                frames.len(),
                config.min_frames
            ));
            continue;
        }

        let n = frames.len();
        info!(filter = %filter, count = n, "Combining flat frames");
        ctx.reporter
            .log(&format!("Filter {filter}: combining {n} flat frames"));

        let header = base_header(&frames[0].1.header);
        let planes: Vec<Array2<f32>> = frames.into_iter().map(|(_, f)| f.data).collect();
        let combined = median_stack(&planes)?;
        let normalized_planes: Vec<Array2<f32>> = planes.iter().map(normalize_by_mean).collect();
        drop(planes);
        let normalized = median_stack(&normalized_planes)?;

        let (flat_name, norm_name) = file_names
            .get(&filter)
            .cloned()
            .unwrap_or_else(|| flat_file_names(&filter));
        let flat_path = write_master(
            &Frame::with_header(combined, flat_header(&header, &filter, n, false)),
            &flat_name,
            ctx,
        )?;
        let norm_path = write_master(
            &Frame::with_header(normalized, flat_header(&header, &filter, n, true)),
            &norm_name,
            ctx,
        )?;

        set.insert(
            filter.clone(),
            MasterFlat {
                flat: Some(MasterFrame {
                    kind: MasterKind::Flat,
                    filter: Some(filter.clone()),
                    method: FLAT_METHOD.into(),
                    path: flat_path,
                }),
                normalized: MasterFrame {
                    kind: MasterKind::FlatNormalized,
                    filter: Some(filter),
                    method: FLAT_METHOD.into(),
                    path: norm_path,
                },
            },
        );
    }

    if set.is_empty() {
        warn!("No master flat could be built");
        ctx.reporter.log("No master flat could be built");
    }
    Ok(set)
}

/// Read flats and group them by filter, applying the signal-level and
/// consistency checks.
fn select_flats(
    records: &[FrameRecord],
    config: &FlatConfig,
    ctx: &StageContext<'_>,
) -> BTreeMap<String, Vec<(PathBuf, Frame)>> {
    let mut groups: BTreeMap<String, Vec<(PathBuf, Frame)>> = BTreeMap::new();

    for (i, record) in records.iter().enumerate() {
        ctx.reporter.advance(i + 1);
        let name = record.file_name();

        let frame = FitsReader::open(&record.path).and_then(|reader| {
            if ctx.classifier.is(&reader.header, &FrameRole::Flat) {
                reader.read_frame().map(Some)
            } else {
                Ok(None)
            }
        });
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(file = %record.path.display(), error = %e, "Skipping unreadable file");
                ctx.reporter.log(&format!("Skipping {name}: {e}"));
                continue;
            }
        };

        let filter = ctx.classifier.filter(&frame.header);
        let mean = frame.mean();
        if !mean.is_finite() {
            warn!(file = %record.path.display(), "Rejecting flat with non-finite mean");
            ctx.reporter
                .log(&format!("Rejecting flat {name}: mean is not finite"));
            continue;
        }
        if mean < config.min_value {
            ctx.reporter.log(&format!(
                "Rejecting flat {name}: mean {mean:.1} below {}",
                config.min_value
            ));
            continue;
        }
        if config.max_value > 0.0 && mean > config.max_value {
            ctx.reporter.log(&format!(
                "Rejecting flat {name}: mean {mean:.1} above {}",
                config.max_value
            ));
            continue;
        }

        let group = groups.entry(filter).or_default();
        if config.check_consistency {
            if let Some((first_path, first)) = group.first() {
                if first.shape() != frame.shape() {
                    warn!(
                        file = %record.path.display(),
                        expected = ?first.shape(),
                        found = ?frame.shape(),
                        "Rejecting inconsistent flat"
                    );
                    ctx.reporter.log(&format!(
                        "Rejecting flat {name}: shape {:?} differs from {}",
                        frame.shape(),
                        display_name(first_path)
                    ));
                    continue;
                }
            }
        }
        group.push((record.path.clone(), frame));
    }

    groups
}

fn flat_header(base: &Header, filter: &str, count: usize, normalized: bool) -> Header {
    let mut header = base.clone();
    header.set_with_comment("MF_FILT", filter, Some("filter of the master flat"));
    header.set_with_comment("MF_NFRM", count, Some("number of combined flat frames"));
    header.set_with_comment("MF_METH", FLAT_METHOD, Some("flat combination method"));
    header.set_with_comment("MF_NORM", normalized, Some("normalized to unit mean"));
    if normalized {
        header.add_history(format!(
            "Normalized master flat ({filter}) from {count} mean-scaled frames"
        ));
    } else {
        header.add_history(format!("Master flat ({filter}) combined from {count} frames"));
    }
    header
}
