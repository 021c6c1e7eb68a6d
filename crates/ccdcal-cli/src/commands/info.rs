use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ccdcal_core::classify::FrameClassifier;
use ccdcal_core::io::fits::FitsReader;
use ccdcal_core::pipeline::CalibConfig;

#[derive(Args)]
pub struct InfoArgs {
    /// Input FITS file
    pub file: PathBuf,

    /// Configuration whose header keywords and labels are used
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let config = match args.config {
        Some(ref path) => CalibConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CalibConfig::default(),
    };
    let classifier = FrameClassifier::new(&config.header);

    let reader = FitsReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let layout = &reader.layout;
    let header = &reader.header;

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", layout.width, layout.height);
    println!("BITPIX:      {}", layout.bitpix);
    println!("Role:        {}", classifier.role(header));
    println!("Filter:      {}", classifier.filter(header));
    match classifier.exposure(header) {
        Some(t) => println!("Exposure:    {t} s"),
        None => println!("Exposure:    unknown"),
    }
    println!();

    for card in header.cards() {
        match card.comment {
            Some(ref comment) => println!(
                "{:<8} = {:<20} / {}",
                card.keyword,
                card.value.to_string(),
                comment
            ),
            None => println!("{:<8} = {}", card.keyword, card.value),
        }
    }
    for line in header.history() {
        println!("HISTORY {line}");
    }

    Ok(())
}
