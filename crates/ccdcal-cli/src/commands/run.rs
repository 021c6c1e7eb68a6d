use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};
use ccdcal_core::io::sources::InputSource;
use ccdcal_core::pipeline::Calibrator;
use tracing::info;

use crate::progress::CliReporter;
use crate::summary::{print_calibration_summary, print_run_report};

#[derive(Args)]
#[command(group(ArgGroup::new("input").required(true).args(["dir", "list", "archive"])))]
pub struct RunArgs {
    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Directory of FITS exposures
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Text file listing one FITS path per line
    #[arg(short, long)]
    pub list: Option<PathBuf>,

    /// zip, tar or tar.gz archive of FITS exposures
    #[arg(short, long)]
    pub archive: Option<PathBuf>,

    /// Extra calibration files merged into the input set
    #[arg(short, long = "extra-calib", num_args = 1..)]
    pub extra: Vec<PathBuf>,

    /// Put work/, results/ and results/aux/ under this directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Only print the final result
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunArgs {
    fn source(&self) -> Option<InputSource> {
        if let Some(ref dir) = self.dir {
            Some(InputSource::Directory(dir.clone()))
        } else if let Some(ref list) = self.list {
            Some(InputSource::ListFile(list.clone()))
        } else {
            self.archive.clone().map(InputSource::Archive)
        }
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let source = args
        .source()
        .context("One of --dir, --list or --archive is required")?;
    let calibrator = Calibrator::from_config_file(&args.config, args.root.as_deref())
        .with_context(|| format!("Failed to set up calibration from {}", args.config.display()))?;

    if !args.quiet {
        print_calibration_summary(calibrator.config(), calibrator.context(), &source);
    }

    let reporter = Arc::new(CliReporter::new(args.quiet));
    let output = calibrator
        .run_reported(&source, &args.extra, reporter.clone())
        .context("Calibration failed")?;
    reporter.finish();
    info!(
        frames = output.frames.len(),
        results = %output.context.results_dir.display(),
        "Run complete"
    );

    if !args.quiet {
        print_run_report(&output.reports);
    }
    println!(
        "{} calibrated frame(s) in {}",
        output.frames.len(),
        output.context.results_dir.display()
    );
    Ok(())
}
