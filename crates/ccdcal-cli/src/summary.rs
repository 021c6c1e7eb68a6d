use ccdcal_core::io::sources::InputSource;
use ccdcal_core::pipeline::{build_plan, CalibConfig, PipelineStage, RunContext, StageReport};
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    failed: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            failed: Style::new().red().bold(),
        }
    }
}

pub fn print_calibration_summary(config: &CalibConfig, context: &RunContext, source: &InputSource) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("CCD Calibration"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(15)));
    println!();

    println!(
        "  {:<14}{} {}",
        s.label.apply_to("Input"),
        s.value.apply_to(source.kind()),
        s.path.apply_to(source.path().display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Working"),
        s.path.apply_to(context.working_dir.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Results"),
        s.path.apply_to(context.results_dir.display())
    );
    println!();

    println!("  {}", s.header.apply_to("Stages"));
    let plan = build_plan(config);
    for stage in [
        PipelineStage::Overscanning,
        PipelineStage::BiasCorrecting,
        PipelineStage::DarkCorrecting,
        PipelineStage::FlatCorrecting,
        PipelineStage::Cosmetic,
        PipelineStage::Background,
    ] {
        let detail = if plan.contains(&stage) {
            s.method.apply_to(stage_detail(config, stage))
        } else {
            s.disabled.apply_to("disabled".to_string())
        };
        println!("    {:<24}{}", s.label.apply_to(stage), detail);
    }
    println!();
}

fn stage_detail(config: &CalibConfig, stage: PipelineStage) -> String {
    let library = |on: bool| if on { " (library)" } else { "" };
    match stage {
        PipelineStage::Overscanning => {
            format!("{} {}", config.overscan.region, config.overscan.mode)
        }
        PipelineStage::BiasCorrecting => format!(
            "{}, sigma {}{}",
            config.bias.method,
            config.bias.sigma,
            library(config.bias.use_library)
        ),
        PipelineStage::DarkCorrecting => {
            format!("{}{}", config.dark.method, library(config.dark.use_library))
        }
        PipelineStage::FlatCorrecting => format!(
            "min {} flats per filter{}",
            config.flat.min_frames,
            library(config.flat.use_library)
        ),
        PipelineStage::Cosmetic => config.cosmetic.bad_pixel_mask.display().to_string(),
        PipelineStage::Background => format!("box {} px", config.background.box_size),
        _ => String::new(),
    }
}

pub fn print_run_report(reports: &[StageReport]) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Results"));
    for report in reports {
        let failed = report.failed();
        let failed = if failed > 0 {
            s.failed.apply_to(format!("{failed} failed"))
        } else {
            s.label.apply_to(format!("{failed} failed"))
        };
        println!(
            "    {:<24}{} written, {} skipped, {}",
            s.label.apply_to(report.stage),
            s.value.apply_to(report.written()),
            report.skipped(),
            failed
        );
    }
    println!();
}
