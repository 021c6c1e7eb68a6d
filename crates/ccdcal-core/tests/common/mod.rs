#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ccdcal_core::frame::{Frame, Header};
use ccdcal_core::io::fits_writer::write_fits;
use ccdcal_core::lineage::FrameRecord;
use ccdcal_core::pipeline::config::DirectoryConfig;
use ccdcal_core::pipeline::{CalibConfig, Calibrator, ProgressReporter, StageContext};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tempfile::TempDir;

/// Default synthetic frame size (height, width).
pub const SHAPE: (usize, usize) = (12, 16);

/// Header with the default keyword names.
pub fn header(role: &str, exptime: Option<f64>, filter: Option<&str>) -> Header {
    let mut h = Header::new();
    h.set("IMAGETYP", role);
    if let Some(t) = exptime {
        h.set("EXPTIME", t);
    }
    if let Some(f) = filter {
        h.set("FILTER", f);
    }
    h
}

pub fn constant_frame(value: f32, header: Header) -> Frame {
    Frame::with_header(Array2::from_elem(SHAPE, value), header)
}

/// Frame of Gaussian noise around `mean`, reproducible from `seed`.
pub fn noisy_frame(mean: f32, sigma: f32, seed: u64, header: Header) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(mean, sigma).unwrap();
    let data = Array2::from_shape_fn(SHAPE, |_| normal.sample(&mut rng));
    Frame::with_header(data, header)
}

pub fn write_frame(dir: &Path, name: &str, frame: &Frame) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    write_fits(frame, &path).unwrap();
    path
}

pub fn mean(data: &Array2<f32>) -> f64 {
    data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64
}

pub fn raw_records(paths: &[PathBuf]) -> Vec<FrameRecord> {
    paths.iter().cloned().map(FrameRecord::raw).collect()
}

/// Scratch directory with a raw input folder and a calibrator whose run
/// directories live under `<tmp>/out`.
pub struct Harness {
    pub dir: TempDir,
    pub calibrator: Calibrator,
}

impl Harness {
    pub fn new(configure: impl FnOnce(&mut CalibConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CalibConfig::default();
        config.directories = DirectoryConfig::rooted_at(&dir.path().join("out"));
        configure(&mut config);
        let calibrator = Calibrator::new(config).unwrap();
        Self { dir, calibrator }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.dir.path().join("raw")
    }

    pub fn write_raw(&self, name: &str, frame: &Frame) -> PathBuf {
        write_frame(&self.raw_dir(), name, frame)
    }

    pub fn ctx<'a>(&'a self, reporter: &'a dyn ProgressReporter) -> StageContext<'a> {
        self.calibrator.stage_context(reporter)
    }

    pub fn working(&self, name: &str) -> PathBuf {
        self.calibrator.context().working_dir.join(name)
    }

    pub fn aux(&self, name: &str) -> PathBuf {
        self.calibrator.context().aux_dir.join(name)
    }

    pub fn results(&self, name: &str) -> PathBuf {
        self.calibrator.context().results_dir.join(name)
    }
}
