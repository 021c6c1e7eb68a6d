use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{CalibError, Result};
use crate::io::fits::read_header;

use super::flat::NORMALIZED_SUFFIX;
use super::{MasterFlat, MasterFlatSet, MasterFrame, MasterKind};

const LIBRARY_METHOD: &str = "library";

/// Looks up previously built masters in an ordered list of directories.
/// Earlier directories win.
#[derive(Clone, Debug)]
pub struct LibraryResolver {
    locations: Vec<PathBuf>,
}

impl LibraryResolver {
    pub fn new(locations: Vec<PathBuf>) -> Self {
        Self { locations }
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// First existing `<location>/<name>`.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.locations
            .iter()
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
    }

    /// Resolve a bias or dark master by file name. The file is used as is.
    pub fn resolve(&self, kind: MasterKind, name: &str) -> Result<MasterFrame> {
        let path = self.find(name).ok_or_else(|| self.missing(name))?;
        info!(kind = %kind, path = %path.display(), "Using library master");
        Ok(MasterFrame {
            kind,
            filter: None,
            method: LIBRARY_METHOD.into(),
            path,
        })
    }

    /// Collect every normalized master flat in the library, paired with its
    /// un-normalized counterpart from the same directory when present.
    pub fn resolve_flats(&self) -> Result<MasterFlatSet> {
        let mut set = MasterFlatSet::new();
        for dir in &self.locations {
            for (filter, normalized) in normalized_flats_in(dir) {
                if set.contains_key(&filter) {
                    continue;
                }
                let flat = unnormalized_counterpart(&normalized)
                    .filter(|p| p.is_file())
                    .map(|path| MasterFrame {
                        kind: MasterKind::Flat,
                        filter: Some(filter.clone()),
                        method: LIBRARY_METHOD.into(),
                        path,
                    });
                debug!(filter = %filter, path = %normalized.display(), "Found library flat");
                set.insert(
                    filter.clone(),
                    MasterFlat {
                        flat,
                        normalized: MasterFrame {
                            kind: MasterKind::FlatNormalized,
                            filter: Some(filter),
                            method: LIBRARY_METHOD.into(),
                            path: normalized,
                        },
                    },
                );
            }
        }

        if set.is_empty() {
            return Err(self.missing(&format!("masterflat_*{NORMALIZED_SUFFIX}")));
        }
        info!(filters = set.len(), "Using library master flats");
        Ok(set)
    }

    fn missing(&self, name: &str) -> CalibError {
        CalibError::MissingLibraryFrame {
            name: name.to_string(),
            searched: self.locations.clone(),
        }
    }
}

/// `(filter, path)` for every `masterflat_<filter>_norm.fits` in `dir`,
/// sorted by file name. The filter comes from the `MF_FILT` card when the
/// header is readable, else from the file name.
fn normalized_flats_in(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| filter_from_file_name(p).is_some())
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| {
            let from_name = filter_from_file_name(&path)?;
            let filter = read_header(&path)
                .ok()
                .and_then(|h| h.get_text("MF_FILT").map(|f| f.trim().to_string()))
                .filter(|f| !f.is_empty())
                .unwrap_or(from_name);
            Some((filter, path))
        })
        .collect()
}

/// `masterflat_<name>.fits` next to `masterflat_<name>_norm.fits`.
fn unnormalized_counterpart(normalized: &Path) -> Option<PathBuf> {
    let name = normalized.file_name()?.to_str()?;
    let stem = name.strip_suffix(NORMALIZED_SUFFIX)?;
    Some(normalized.with_file_name(format!("{stem}.fits")))
}

fn filter_from_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("masterflat_")?
        .strip_suffix(NORMALIZED_SUFFIX)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
}
