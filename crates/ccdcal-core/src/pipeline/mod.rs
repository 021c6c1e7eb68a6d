pub mod config;
mod orchestrator;
pub mod types;

pub use config::CalibConfig;
pub use orchestrator::{build_plan, Calibrator};
pub use types::{
    CalibrationOutput, FileOutcome, LogCallback, NoOpReporter, PipelineStage, ProgressReporter,
    RunContext, StageContext, StageOutput, StageReport,
};
