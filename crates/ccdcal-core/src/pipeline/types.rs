use std::fmt;
use std::path::{Path, PathBuf};

use crate::classify::FrameClassifier;
use crate::error::Result;
use crate::lineage::FrameRecord;

use super::config::DirectoryConfig;

/// Pipeline processing stage, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Collecting,
    Overscanning,
    BiasBuilding,
    BiasCorrecting,
    DarkBuilding,
    DarkCorrecting,
    FlatBuilding,
    FlatCorrecting,
    Publishing,
    Cosmetic,
    Background,
    Done,
}

impl PipelineStage {
    /// Short name used for the per-stage list file.
    pub fn list_name(self) -> &'static str {
        match self {
            Self::Collecting => "collected",
            Self::Overscanning => "overscan",
            Self::BiasBuilding => "masterbias",
            Self::BiasCorrecting => "bias",
            Self::DarkBuilding => "masterdark",
            Self::DarkCorrecting => "dark",
            Self::FlatBuilding => "masterflat",
            Self::FlatCorrecting => "flat",
            Self::Publishing => "results",
            Self::Cosmetic => "cosmetic",
            Self::Background => "background",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collecting => write!(f, "Collecting input files"),
            Self::Overscanning => write!(f, "Overscan correction"),
            Self::BiasBuilding => write!(f, "Building master bias"),
            Self::BiasCorrecting => write!(f, "Bias correction"),
            Self::DarkBuilding => write!(f, "Building master dark"),
            Self::DarkCorrecting => write!(f, "Dark correction"),
            Self::FlatBuilding => write!(f, "Building master flats"),
            Self::FlatCorrecting => write!(f, "Flat correction"),
            Self::Publishing => write!(f, "Publishing results"),
            Self::Cosmetic => write!(f, "Cosmetic correction"),
            Self::Background => write!(f, "Background subtraction"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, log panes, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new pipeline stage has started. `total_items` is the number of
    /// work items in this stage (e.g., frame count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// One work item within the current stage has completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}

    /// A human-readable status line (stage banners, skip notices, counts).
    fn log(&self, _message: &str) {}
}

/// Reporter that ignores everything.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Forwards log lines to a closure; progress events are ignored.
pub struct LogCallback<F>(pub F);

impl<F> ProgressReporter for LogCallback<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        (self.0)(message)
    }
}

/// Directories of one calibration run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunContext {
    pub working_dir: PathBuf,
    pub results_dir: PathBuf,
    pub aux_dir: PathBuf,
}

impl RunContext {
    /// Create all run directories. Existing directories are reused.
    pub fn create(dirs: &DirectoryConfig) -> Result<Self> {
        for dir in [&dirs.working_dir, &dirs.results_dir, &dirs.aux_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            working_dir: dirs.working_dir.clone(),
            results_dir: dirs.results_dir.clone(),
            aux_dir: dirs.aux_dir.clone(),
        })
    }

    pub fn list_file(&self, stage: PipelineStage) -> PathBuf {
        self.working_dir
            .join(format!("pipeline_{}.lst", stage.list_name()))
    }

    pub fn working_path(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    /// Directories searched for library masters, in priority order.
    pub fn library_locations(&self) -> Vec<PathBuf> {
        vec![self.aux_dir.clone(), self.working_dir.clone()]
    }
}

/// Everything a builder, applier or post processor needs besides its
/// inputs and its own configuration section.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub classifier: &'a FrameClassifier,
    pub run: &'a RunContext,
    /// Write PNG previews next to mirrored masters.
    pub preview_masters: bool,
    pub reporter: &'a dyn ProgressReporter,
}

/// Result of processing one file in a stage.
#[derive(Clone, Debug, PartialEq)]
pub enum FileOutcome {
    Written(PathBuf),
    Skipped(String),
    Failed(String),
}

/// Per-file outcomes of one stage.
#[derive(Clone, Debug)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub outcomes: Vec<(PathBuf, FileOutcome)>,
}

impl StageReport {
    pub fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, input: &Path, outcome: FileOutcome) {
        self.outcomes.push((input.to_path_buf(), outcome));
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Written(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// What a stage hands to the next one.
#[derive(Clone, Debug)]
pub struct StageOutput {
    pub records: Vec<FrameRecord>,
    pub report: StageReport,
}

/// Final result of a calibration run.
#[derive(Clone, Debug)]
pub struct CalibrationOutput {
    /// Fully processed object frames in the results directory, sorted.
    pub frames: Vec<PathBuf>,
    pub reports: Vec<StageReport>,
    pub context: RunContext,
}
