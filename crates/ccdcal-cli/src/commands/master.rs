use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use ccdcal_core::io::sources::{read_list_file, sorted_unique};
use ccdcal_core::lineage::FrameRecord;
use ccdcal_core::master::{build_master_bias, build_master_dark, build_master_flats};
use ccdcal_core::pipeline::Calibrator;
use tracing::info;

use crate::progress::CliReporter;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MasterKindArg {
    Bias,
    Dark,
    Flat,
}

#[derive(Args)]
pub struct MasterArgs {
    /// Which master to build
    #[arg(value_enum)]
    pub kind: MasterKindArg,

    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Text file listing the input exposures
    #[arg(short, long)]
    pub list: PathBuf,

    /// Put work/, results/ and results/aux/ under this directory
    #[arg(long)]
    pub root: Option<PathBuf>,
}

pub fn run(args: &MasterArgs) -> Result<()> {
    let calibrator = Calibrator::from_config_file(&args.config, args.root.as_deref())
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let paths = read_list_file(&args.list)
        .with_context(|| format!("Failed to read list {}", args.list.display()))?;
    let records: Vec<FrameRecord> = sorted_unique(paths)
        .into_iter()
        .filter(|p| p.is_file())
        .map(FrameRecord::raw)
        .collect();
    anyhow::ensure!(!records.is_empty(), "No existing files listed in {}", args.list.display());
    info!(kind = ?args.kind, inputs = records.len(), "Building master");

    let reporter = CliReporter::new(false);
    let ctx = calibrator.stage_context(&reporter);
    let config = calibrator.config();

    match args.kind {
        MasterKindArg::Bias => {
            let master = build_master_bias(&records, &config.bias, &ctx)?;
            println!("Master bias: {}", master.path.display());
        }
        MasterKindArg::Dark => {
            let master = build_master_dark(&records, &config.dark, &ctx)?;
            println!("Master dark: {}", master.path.display());
        }
        MasterKindArg::Flat => {
            let set = build_master_flats(&records, &config.flat, &ctx)?;
            anyhow::ensure!(!set.is_empty(), "No master flat could be built");
            for (filter, master) in &set {
                println!("Master flat {filter}: {}", master.normalized.path.display());
            }
        }
    }
    reporter.finish();
    Ok(())
}
