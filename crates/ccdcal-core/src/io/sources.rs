use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::FITS_EXTENSIONS;
use crate::error::{CalibError, Result};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8; 2] = b"\x1f\x8b";
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8; 5] = b"ustar";

/// Where the raw exposures of a run come from.
#[derive(Clone, Debug, PartialEq)]
pub enum InputSource {
    /// Directory scanned (non-recursively) for FITS files.
    Directory(PathBuf),
    /// Text file with one FITS path per line.
    ListFile(PathBuf),
    /// zip, tar or tar.gz archive, extracted under the working directory.
    Archive(PathBuf),
}

impl InputSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(p) | Self::ListFile(p) | Self::Archive(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::ListFile(_) => "list",
            Self::Archive(_) => "archive",
        }
    }

    /// Resolve the source into a sorted, deduplicated list of FITS paths.
    ///
    /// Archives are extracted into `<working_dir>/archives/<name>`; an earlier
    /// extraction of the same archive is removed first.
    pub fn resolve(&self, working_dir: &Path) -> Result<Vec<PathBuf>> {
        let files = match self {
            Self::Directory(dir) => {
                if !dir.is_dir() {
                    return Err(CalibError::InputNotFound(dir.clone()));
                }
                let files = fits_files_in_directory(dir)?;
                info!(count = files.len(), dir = %dir.display(), "Found FITS files in directory");
                files
            }
            Self::ListFile(list) => {
                if !list.is_file() {
                    return Err(CalibError::InputNotFound(list.clone()));
                }
                let files: Vec<PathBuf> = read_list_file(list)?
                    .into_iter()
                    .filter(|p| is_fits_path(p) && p.is_file())
                    .collect();
                info!(count = files.len(), list = %list.display(), "Loaded FITS files from list");
                files
            }
            Self::Archive(archive) => {
                if !archive.is_file() {
                    return Err(CalibError::InputNotFound(archive.clone()));
                }
                let target = extract_archive(archive, &working_dir.join("archives"))?;
                let files = fits_files_recursive(&target);
                info!(
                    count = files.len(),
                    target = %target.display(),
                    "Extracted archive"
                );
                files
            }
        };
        Ok(sorted_unique(files))
    }
}

/// True for `.fits`, `.fit` and `.fts` in any letter case.
pub fn is_fits_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FITS_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// FITS files directly inside `dir`, sorted.
pub fn fits_files_in_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_fits_path(&path) {
            files.push(absolute(&path));
        }
    }
    files.sort();
    Ok(files)
}

/// FITS files anywhere below `dir`, sorted.
pub fn fits_files_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_fits_path(e.path()))
        .map(|e| absolute(e.path()))
        .collect();
    files.sort();
    files
}

/// Read newline-separated paths; blank lines are skipped and relative
/// entries are resolved against the list file's directory.
pub fn read_list_file(list: &Path) -> Result<Vec<PathBuf>> {
    let base = list.parent().unwrap_or(Path::new("."));
    let reader = BufReader::new(File::open(list)?);
    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let p = PathBuf::from(line);
        let p = if p.is_relative() { base.join(p) } else { p };
        paths.push(absolute(&p));
    }
    Ok(paths)
}

/// Write one path per line.
pub fn write_list_file(path: &Path, items: &[PathBuf]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut w = BufWriter::new(File::create(path)?);
    for item in items {
        writeln!(w, "{}", item.display())?;
    }
    w.flush()?;
    Ok(())
}

/// Extract a zip or (optionally gzipped) tar archive into
/// `<extract_root>/<archive name>` and return that directory.
pub fn extract_archive(archive: &Path, extract_root: &Path) -> Result<PathBuf> {
    let name = archive_base_name(archive);
    let target = extract_root.join(name);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::create_dir_all(&target)?;

    let mut magic = [0u8; 512];
    let read = read_prefix(archive, &mut magic)?;
    let magic = &magic[..read];

    if magic.starts_with(ZIP_MAGIC) {
        debug!(archive = %archive.display(), "Extracting zip archive");
        let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
        zip.extract(&target)?;
    } else if magic.starts_with(GZIP_MAGIC) {
        debug!(archive = %archive.display(), "Extracting tar.gz archive");
        let decoder = GzDecoder::new(File::open(archive)?);
        tar::Archive::new(decoder).unpack(&target)?;
    } else if magic.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &magic[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        debug!(archive = %archive.display(), "Extracting tar archive");
        tar::Archive::new(File::open(archive)?).unpack(&target)?;
    } else {
        return Err(CalibError::UnsupportedArchive(archive.to_path_buf()));
    }

    Ok(target)
}

/// `run.tar.gz` -> `run`, `run.zip` -> `run`
fn archive_base_name(archive: &Path) -> String {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    stem.strip_suffix(".tar").map(str::to_string).unwrap_or(stem)
}

fn read_prefix(path: &Path, buf: &mut [u8]) -> Result<usize> {
    let mut file = File::open(path)?;
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Sort and remove duplicate paths.
pub fn sorted_unique(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();
    paths
}
