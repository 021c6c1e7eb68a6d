use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::classify::{FrameClassifier, FrameRole};
use crate::correct::{apply_bias, apply_dark, apply_flat};
use crate::error::{CalibError, Result};
use crate::io::fits::read_header;
use crate::io::sources::{is_fits_path, sorted_unique, write_list_file, InputSource};
use crate::lineage::{qualify_duplicate_origins, FrameRecord};
use crate::master::{build_master_bias, build_master_dark, build_master_flats, MasterFlatSet, MasterFrame};
use crate::postprocess::{apply_background, apply_cosmetic, apply_overscan};

use super::config::{CalibConfig, DirectoryConfig};
use super::types::{
    CalibrationOutput, FileOutcome, NoOpReporter, PipelineStage, ProgressReporter, RunContext,
    StageContext, StageReport,
};

/// Ordered stage list for a configuration. Disabled stages are absent.
pub fn build_plan(config: &CalibConfig) -> Vec<PipelineStage> {
    let mut plan = vec![PipelineStage::Collecting];
    if config.overscan.enabled {
        plan.push(PipelineStage::Overscanning);
    }
    if config.bias.enabled {
        plan.extend([PipelineStage::BiasBuilding, PipelineStage::BiasCorrecting]);
    }
    if config.dark.enabled {
        plan.extend([PipelineStage::DarkBuilding, PipelineStage::DarkCorrecting]);
    }
    if config.flat.enabled {
        plan.extend([PipelineStage::FlatBuilding, PipelineStage::FlatCorrecting]);
    }
    plan.push(PipelineStage::Publishing);
    if config.cosmetic.enabled {
        plan.push(PipelineStage::Cosmetic);
    }
    if config.background.enabled {
        plan.push(PipelineStage::Background);
    }
    plan.push(PipelineStage::Done);
    plan
}

/// Runs the calibration stages in order over one input set.
///
/// Construction creates the run directories; nothing in the pipeline ever
/// deletes them.
pub struct Calibrator {
    config: CalibConfig,
    context: RunContext,
    classifier: FrameClassifier,
}

impl Calibrator {
    /// Use the directories in `config` as given.
    pub fn new(config: CalibConfig) -> Result<Self> {
        config.validate()?;
        let context = RunContext::create(&config.directories)?;
        let classifier = FrameClassifier::new(&config.header);
        Ok(Self {
            config,
            context,
            classifier,
        })
    }

    /// Load a configuration file. Relative paths in it are resolved against
    /// its directory, unless `root` is given, in which case the run
    /// directories are `<root>/work`, `<root>/results` and
    /// `<root>/results/aux`.
    pub fn from_config_file(path: &Path, root: Option<&Path>) -> Result<Self> {
        let mut config = CalibConfig::load(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.resolve_relative_paths(base);
        if let Some(root) = root {
            config.directories = DirectoryConfig::rooted_at(root);
        }
        Self::new(config)
    }

    pub fn config(&self) -> &CalibConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn classifier(&self) -> &FrameClassifier {
        &self.classifier
    }

    pub fn stage_context<'a>(&'a self, reporter: &'a dyn ProgressReporter) -> StageContext<'a> {
        StageContext {
            classifier: &self.classifier,
            run: &self.context,
            preview_masters: self.config.preview.masters,
            reporter,
        }
    }

    /// Run without progress reporting.
    pub fn run(&self, source: &InputSource, extra_calib: &[PathBuf]) -> Result<CalibrationOutput> {
        self.run_reported(source, extra_calib, Arc::new(NoOpReporter))
    }

    /// Run every planned stage and return the published object frames.
    pub fn run_reported(
        &self,
        source: &InputSource,
        extra_calib: &[PathBuf],
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<CalibrationOutput> {
        let reporter = reporter.as_ref();
        let ctx = self.stage_context(reporter);
        let plan = build_plan(&self.config);
        info!(stages = ?plan, "Starting calibration");

        let mut current: Vec<FrameRecord> = Vec::new();
        let mut reports: Vec<StageReport> = Vec::new();
        let mut master_bias: Option<MasterFrame> = None;
        let mut master_dark: Option<MasterFrame> = None;
        let mut master_flats = MasterFlatSet::new();
        let mut published: Vec<PathBuf> = Vec::new();

        for stage in plan {
            if stage == PipelineStage::Done {
                break;
            }
            reporter.log(&format!("=== {stage} ==="));
            let total = match stage {
                PipelineStage::Collecting => None,
                PipelineStage::Cosmetic | PipelineStage::Background => Some(published.len()),
                _ => Some(current.len()),
            };
            reporter.begin_stage(stage, total);

            match stage {
                PipelineStage::Collecting => {
                    current = self.collect(source, extra_calib, reporter)?;
                }
                PipelineStage::Overscanning => {
                    let out = apply_overscan(&current, &self.config.overscan, &ctx);
                    current = out.records;
                    reports.push(out.report);
                }
                PipelineStage::BiasBuilding => {
                    master_bias = Some(build_master_bias(&current, &self.config.bias, &ctx)?);
                }
                PipelineStage::BiasCorrecting => {
                    let master = master_bias.as_ref().ok_or_else(|| missing_master("bias"))?;
                    let out = apply_bias(&current, master, &ctx)?;
                    current = out.records;
                    reports.push(out.report);
                }
                PipelineStage::DarkBuilding => {
                    master_dark = Some(build_master_dark(&current, &self.config.dark, &ctx)?);
                }
                PipelineStage::DarkCorrecting => {
                    let master = master_dark.as_ref().ok_or_else(|| missing_master("dark"))?;
                    let out = apply_dark(&current, master, &ctx)?;
                    current = out.records;
                    reports.push(out.report);
                }
                PipelineStage::FlatBuilding => {
                    master_flats = build_master_flats(&current, &self.config.flat, &ctx)?;
                }
                PipelineStage::FlatCorrecting => {
                    let out = apply_flat(&current, &master_flats, &ctx)?;
                    current = out.records;
                    reports.push(out.report);
                }
                PipelineStage::Publishing => {
                    let report = self.publish(&current, &ctx);
                    published = written_paths(&report);
                    reports.push(report);
                }
                PipelineStage::Cosmetic => {
                    reports.push(apply_cosmetic(&published, &self.config.cosmetic, &ctx));
                }
                PipelineStage::Background => {
                    reports.push(apply_background(&published, &self.config.background, &ctx));
                }
                PipelineStage::Done => {}
            }

            if stage_updates_list(stage) {
                let list = self.context.list_file(stage);
                write_list_file(&list, &record_paths(&current))?;
            }
            reporter.finish_stage();
        }

        reporter.log(&format!(
            "Calibration finished: {} frame(s) in {}",
            published.len(),
            self.context.results_dir.display()
        ));
        info!(frames = published.len(), "Calibration finished");

        Ok(CalibrationOutput {
            frames: published,
            reports,
            context: self.context.clone(),
        })
    }

    /// Resolve the input source, merge in extra calibration files and turn
    /// everything into frame records. An empty set is fatal.
    pub fn collect(
        &self,
        source: &InputSource,
        extra_calib: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<FrameRecord>> {
        let mut paths = source.resolve(&self.context.working_dir)?;
        for extra in extra_calib {
            if extra.is_file() && is_fits_path(extra) {
                paths.push(fs::canonicalize(extra).unwrap_or_else(|_| extra.clone()));
            } else {
                warn!(file = %extra.display(), "Ignoring extra calibration file");
                reporter.log(&format!(
                    "Ignoring extra calibration file {} (missing or not FITS)",
                    extra.display()
                ));
            }
        }
        let paths = sorted_unique(paths);
        if paths.is_empty() {
            return Err(CalibError::NoInputFiles(source.path().to_path_buf()));
        }

        reporter.log(&format!(
            "Found {} FITS file(s) in {} {}",
            paths.len(),
            source.kind(),
            source.path().display()
        ));
        let mut records: Vec<FrameRecord> = paths
            .into_iter()
            .map(|path| match read_header(&path) {
                Ok(header) => FrameRecord::from_header(path, &header),
                Err(_) => FrameRecord::raw(path),
            })
            .collect();
        let renamed = qualify_duplicate_origins(&mut records);
        if renamed > 0 {
            warn!(renamed, "Input file names collide, prefixing with directory names");
            reporter.log(&format!(
                "{renamed} input file(s) share a name; outputs are prefixed with their directory name"
            ));
        }
        Ok(records)
    }

    /// Copy the object frames of the current set into the results dir.
    fn publish(&self, records: &[FrameRecord], ctx: &StageContext<'_>) -> StageReport {
        let mut report = StageReport::new(PipelineStage::Publishing);
        for (i, record) in records.iter().enumerate() {
            let outcome = match read_header(&record.path) {
                Ok(header) if self.classifier.is(&header, &FrameRole::Object) => {
                    let target = self.context.results_dir.join(record.file_name());
                    match fs::copy(&record.path, &target) {
                        Ok(_) => FileOutcome::Written(target),
                        Err(e) => {
                            warn!(file = %record.path.display(), error = %e, "Could not publish");
                            ctx.reporter
                                .log(&format!("Error publishing {}: {e}", record.file_name()));
                            FileOutcome::Failed(e.to_string())
                        }
                    }
                }
                Ok(_) => FileOutcome::Skipped("not an object frame".into()),
                Err(e) => {
                    ctx.reporter
                        .log(&format!("Error reading {}: {e}", record.file_name()));
                    FileOutcome::Failed(e.to_string())
                }
            };
            report.record(&record.path, outcome);
            ctx.reporter.advance(i + 1);
        }
        ctx.reporter.log(&format!(
            "{} calibrated frame(s) published to {}",
            report.written(),
            self.context.results_dir.display()
        ));
        report
    }
}

fn stage_updates_list(stage: PipelineStage) -> bool {
    matches!(
        stage,
        PipelineStage::Collecting
            | PipelineStage::Overscanning
            | PipelineStage::BiasCorrecting
            | PipelineStage::DarkCorrecting
            | PipelineStage::FlatCorrecting
    )
}

fn record_paths(records: &[FrameRecord]) -> Vec<PathBuf> {
    records.iter().map(|r| r.path.clone()).collect()
}

fn written_paths(report: &StageReport) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = report
        .outcomes
        .iter()
        .filter_map(|(_, o)| match o {
            FileOutcome::Written(p) => Some(p.clone()),
            _ => None,
        })
        .collect();
    paths.sort();
    paths
}

fn missing_master(role: &str) -> CalibError {
    CalibError::NoFramesFound { role: role.into() }
}
