use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("No {role} frames found; cannot create master {role}")]
    NoFramesFound { role: String },

    #[error("Library frame '{name}' not found (searched: {searched:?})")]
    MissingLibraryFrame { name: String, searched: Vec<PathBuf> },

    #[error("No FITS files found for calibration in {0}")]
    NoInputFiles(PathBuf),

    #[error("Input source not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Empty frame sequence")]
    EmptySequence,
}

pub type Result<T> = std::result::Result<T, CalibError>;
