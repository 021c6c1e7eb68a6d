mod common;

use std::fs;
use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use ccdcal_core::error::CalibError;
use ccdcal_core::io::read_fits;
use ccdcal_core::io::sources::{read_list_file, write_list_file, InputSource};
use ccdcal_core::pipeline::{
    CalibConfig, Calibrator, FileOutcome, LogCallback, PipelineStage, ProgressReporter,
};

use common::{constant_frame, header, mean, noisy_frame, Harness};

fn only(config: &mut CalibConfig, bias: bool, dark: bool, flat: bool) {
    config.bias.enabled = bias;
    config.dark.enabled = dark;
    config.flat.enabled = flat;
}

/// Bias 100, darks 150 at 10 s, flats 1100 at 2 s in R, one object of 500
/// at 20 s in R. Fully calibrated the object is 300.
fn write_full_night(h: &Harness) {
    for i in 0..5 {
        h.write_raw(&format!("bias_{i}.fits"), &constant_frame(100.0, header("BIAS", Some(0.0), None)));
    }
    for i in 0..3 {
        h.write_raw(&format!("dark_{i}.fits"), &constant_frame(150.0, header("DARK", Some(10.0), None)));
    }
    for i in 0..3 {
        h.write_raw(&format!("flat_{i}.fits"), &constant_frame(1100.0, header("FLAT", Some(2.0), Some("R"))));
    }
    h.write_raw("m31_001.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), Some("R"))));
}

fn raw_source(h: &Harness) -> InputSource {
    InputSource::Directory(h.raw_dir())
}

// ---------------------------------------------------------------------------
// Fatal conditions
// ---------------------------------------------------------------------------

#[test]
fn test_empty_input_is_fatal_before_any_stage() {
    let h = Harness::new(|_| {});
    fs::create_dir_all(h.raw_dir()).unwrap();

    let err = h.calibrator.run(&raw_source(&h), &[]).unwrap_err();
    assert!(matches!(err, CalibError::NoInputFiles(_)));
    assert!(!h.calibrator.context().list_file(PipelineStage::Collecting).exists());
    assert!(!h.working("masterbias.fits").exists());
}

#[test]
fn test_missing_required_master_is_fatal() {
    let h = Harness::new(|c| only(c, false, true, false));
    h.write_raw("m31.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let err = h.calibrator.run(&raw_source(&h), &[]).unwrap_err();
    assert!(matches!(err, CalibError::NoFramesFound { ref role } if role == "dark"));
}

#[test]
fn test_run_directories_are_created() {
    let h = Harness::new(|_| {});
    let ctx = h.calibrator.context();
    assert!(ctx.working_dir.is_dir());
    assert!(ctx.results_dir.is_dir());
    assert!(ctx.aux_dir.is_dir());
    assert!(ctx.aux_dir.starts_with(&ctx.results_dir));
}

// ---------------------------------------------------------------------------
// Single-stage scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_bias_scenario() {
    let h = Harness::new(|c| only(c, true, false, false));
    for i in 0..5 {
        h.write_raw(&format!("bias_{i}.fits"), &noisy_frame(100.0, 2.0, i, header("BIAS", None, None)));
    }
    h.write_raw("m31.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    let master = mean(&read_fits(&h.aux("masterbias.fits")).unwrap().data);
    assert!((99.0..=101.0).contains(&master), "master bias mean {master}");

    assert_eq!(out.frames, vec![h.results("m31-b.fits")]);
    let frame = read_fits(&out.frames[0]).unwrap();
    assert_abs_diff_eq!(mean(&frame.data), 400.0, epsilon = 1.0);
}

#[test]
fn test_dark_scenario() {
    let h = Harness::new(|c| only(c, false, true, false));
    for i in 0..3 {
        h.write_raw(&format!("dark_{i}.fits"), &constant_frame(50.0, header("DARK", Some(10.0), None)));
    }
    h.write_raw("m31.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    let rate = mean(&read_fits(&h.aux("masterdark.fits")).unwrap().data);
    assert_abs_diff_eq!(rate, 5.0, epsilon = 1e-4);

    let frame = read_fits(&out.frames[0]).unwrap();
    assert_eq!(out.frames[0], h.results("m31-d.fits"));
    assert_abs_diff_eq!(mean(&frame.data), 400.0, epsilon = 1e-3);
}

#[test]
fn test_flat_scenario() {
    let h = Harness::new(|c| only(c, false, false, true));
    for i in 0..3 {
        h.write_raw(&format!("flat_{i}.fits"), &noisy_frame(1000.0, 10.0, i, header("FLAT", Some(2.0), Some("R"))));
    }
    h.write_raw("m31.fits", &constant_frame(300.0, header("OBJECT", Some(20.0), Some("R"))));

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    let norm = read_fits(&h.aux("masterflat_R_norm.fits")).unwrap();
    assert!(norm.data.iter().all(|&v| (v - 1.0).abs() < 0.05));

    let frame = read_fits(&out.frames[0]).unwrap();
    assert_abs_diff_eq!(mean(&frame.data), 300.0, epsilon = 1.0);
}

// ---------------------------------------------------------------------------
// Full chain
// ---------------------------------------------------------------------------

#[test]
fn test_full_chain() {
    let h = Harness::new(|_| {});
    write_full_night(&h);

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    assert_eq!(out.frames, vec![h.results("m31_001-bdf.fits")]);

    let frame = read_fits(&out.frames[0]).unwrap();
    assert_abs_diff_eq!(mean(&frame.data), 300.0, epsilon = 1e-2);
    assert_eq!(frame.header.get_text("CALSTAGE"), Some("bdf"));
    assert_eq!(frame.header.get_text("MB_FILE"), Some("masterbias.fits"));
    assert_eq!(frame.header.get_text("MD_FILE"), Some("masterdark.fits"));
    assert_eq!(frame.header.get_text("MF_FILE"), Some("masterflat_R_norm.fits"));

    for name in [
        "masterbias.fits",
        "masterdark.fits",
        "masterflat_R.fits",
        "masterflat_R_norm.fits",
    ] {
        assert!(h.aux(name).is_file(), "{name} not mirrored");
    }

    let stages: Vec<PipelineStage> = out.reports.iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![
            PipelineStage::BiasCorrecting,
            PipelineStage::DarkCorrecting,
            PipelineStage::FlatCorrecting,
            PipelineStage::Publishing,
        ]
    );
}

#[test]
fn test_rerun_is_reproducible() {
    let h = Harness::new(|_| {});
    write_full_night(&h);

    let first = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    let a = read_fits(&first.frames[0]).unwrap().data;
    let second = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    let b = read_fits(&second.frames[0]).unwrap().data;

    assert_eq!(first.frames, second.frames);
    assert_eq!(a, b);
}

#[test]
fn test_list_files_follow_the_frame_set() {
    let h = Harness::new(|_| {});
    write_full_night(&h);
    h.calibrator.run(&raw_source(&h), &[]).unwrap();

    let ctx = h.calibrator.context();
    let collected = read_list_file(&ctx.list_file(PipelineStage::Collecting)).unwrap();
    assert_eq!(collected.len(), 12);

    // Bias frames leave the set at bias correction, darks at dark correction.
    let after_bias = read_list_file(&ctx.list_file(PipelineStage::BiasCorrecting)).unwrap();
    assert_eq!(after_bias.len(), 7);
    let after_dark = read_list_file(&ctx.list_file(PipelineStage::DarkCorrecting)).unwrap();
    assert_eq!(after_dark.len(), 4);
    let after_flat = read_list_file(&ctx.list_file(PipelineStage::FlatCorrecting)).unwrap();
    assert_eq!(after_flat.len(), 1);
    assert!(after_flat[0].ends_with("m31_001-bdf.fits"));
}

#[test]
fn test_library_masters_reused_by_later_run() {
    let h = Harness::new(|_| {});
    write_full_night(&h);
    h.calibrator.run(&raw_source(&h), &[]).unwrap();

    let mut config = h.calibrator.config().clone();
    config.bias.use_library = true;
    config.dark.use_library = true;
    config.flat.use_library = true;
    let reuse = Calibrator::new(config).unwrap();

    let tonight = h.dir.path().join("tonight");
    common::write_frame(&tonight, "m31_002.fits", &constant_frame(700.0, header("OBJECT", Some(40.0), Some("R"))));
    let out = reuse.run(&InputSource::Directory(tonight), &[]).unwrap();

    let frame = read_fits(&out.frames[0]).unwrap();
    assert_eq!(out.frames[0], h.results("m31_002-bdf.fits"));
    // 700 - 100 bias - 40 s * 5/s dark
    assert_abs_diff_eq!(mean(&frame.data), 400.0, epsilon = 1e-2);
    assert_eq!(frame.header.get_text("MB_METH"), Some("library"));
}

// ---------------------------------------------------------------------------
// Inputs and reporting
// ---------------------------------------------------------------------------

#[test]
fn test_extra_calibration_files_are_merged() {
    let h = Harness::new(|c| only(c, true, false, false));
    h.write_raw("m31.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let bias_dir = h.dir.path().join("bias");
    let mut extras: Vec<_> = (0..3)
        .map(|i| common::write_frame(&bias_dir, &format!("b{i}.fits"), &constant_frame(100.0, header("BIAS", None, None))))
        .collect();
    fs::write(bias_dir.join("readme.txt"), "bias set").unwrap();
    extras.push(bias_dir.join("readme.txt"));
    extras.push(bias_dir.join("missing.fits"));

    let out = h.calibrator.run(&raw_source(&h), &extras).unwrap();
    let frame = read_fits(&out.frames[0]).unwrap();
    assert_abs_diff_eq!(mean(&frame.data), 400.0, epsilon = 1e-3);

    let collected = read_list_file(&h.calibrator.context().list_file(PipelineStage::Collecting)).unwrap();
    assert_eq!(collected.len(), 4);
}

#[test]
fn test_same_file_name_from_different_nights() {
    let h = Harness::new(|c| only(c, true, false, false));
    let night1 = h.dir.path().join("n1");
    let night2 = h.dir.path().join("n2");
    let mut inputs: Vec<_> = (0..3)
        .map(|i| common::write_frame(&night1, &format!("bias_{i}.fits"), &constant_frame(100.0, header("BIAS", None, None))))
        .collect();
    inputs.push(common::write_frame(&night1, "obj.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None))));
    inputs.push(common::write_frame(&night2, "obj.fits", &constant_frame(900.0, header("OBJECT", Some(20.0), None))));
    let list = h.dir.path().join("both.lst");
    write_list_file(&list, &inputs).unwrap();

    let out = h.calibrator.run(&InputSource::ListFile(list), &[]).unwrap();
    assert_eq!(out.frames, vec![h.results("n1_obj-b.fits"), h.results("n2_obj-b.fits")]);
    assert_abs_diff_eq!(mean(&read_fits(&out.frames[0]).unwrap().data), 400.0, epsilon = 1e-3);
    assert_abs_diff_eq!(mean(&read_fits(&out.frames[1]).unwrap().data), 800.0, epsilon = 1e-3);
}

#[test]
fn test_already_corrected_input_is_not_corrected_again() {
    let h = Harness::new(|c| only(c, true, false, false));
    for i in 0..3 {
        h.write_raw(&format!("bias_{i}.fits"), &constant_frame(100.0, header("BIAS", None, None)));
    }
    let mut done = header("OBJECT", Some(20.0), None);
    done.set("CALSTAGE", "b");
    h.write_raw("m31-b.fits", &constant_frame(400.0, done));
    h.write_raw("m42.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    assert_eq!(out.frames, vec![h.results("m31-b.fits"), h.results("m42-b.fits")]);
    assert_abs_diff_eq!(mean(&read_fits(&out.frames[0]).unwrap().data), 400.0, epsilon = 1e-3);
    assert_abs_diff_eq!(mean(&read_fits(&out.frames[1]).unwrap().data), 400.0, epsilon = 1e-3);

    let bias_report = out
        .reports
        .iter()
        .find(|r| r.stage == PipelineStage::BiasCorrecting)
        .unwrap();
    assert!(bias_report.outcomes.iter().any(|(p, o)| p.ends_with("m31-b.fits")
        && matches!(o, FileOutcome::Skipped(reason) if reason == "already bias-corrected")));
}

#[test]
fn test_log_callback_receives_progress() {
    let h = Harness::new(|c| only(c, true, false, false));
    for i in 0..3 {
        h.write_raw(&format!("bias_{i}.fits"), &constant_frame(100.0, header("BIAS", None, None)));
    }
    h.write_raw("m31.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let reporter: Arc<dyn ProgressReporter> = Arc::new(LogCallback(move |line: &str| {
        sink.lock().unwrap().push(line.to_string());
    }));
    h.calibrator.run_reported(&raw_source(&h), &[], reporter).unwrap();

    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|l| l == "=== Collecting input files ==="));
    assert!(lines.iter().any(|l| l.starts_with("Found 4 FITS file(s)")));
    assert!(lines.iter().any(|l| l.contains("Combining 3 bias frames")));
    assert!(lines.iter().any(|l| l.starts_with("Calibration finished: 1 frame(s)")));
}

#[test]
fn test_corrupt_file_does_not_abort_run() {
    let h = Harness::new(|_| {});
    write_full_night(&h);
    let corrupt = h.raw_dir().join("bias_9.fits");
    fs::write(&corrupt, b"this is not a FITS file at all").unwrap();

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    assert_eq!(out.frames.len(), 1);
    assert_abs_diff_eq!(mean(&read_fits(&out.frames[0]).unwrap().data), 300.0, epsilon = 1e-2);

    let bias_report = out
        .reports
        .iter()
        .find(|r| r.stage == PipelineStage::BiasCorrecting)
        .unwrap();
    assert_eq!(bias_report.failed(), 1);
    assert!(bias_report
        .outcomes
        .iter()
        .any(|(p, o)| p.ends_with("bias_9.fits") && matches!(o, FileOutcome::Failed(_))));
}

#[test]
fn test_post_processors_run_on_results() {
    let h = Harness::new(|c| {
        only(c, true, false, false);
        c.background.enabled = true;
        c.background.box_size = 5;
    });
    for i in 0..3 {
        h.write_raw(&format!("bias_{i}.fits"), &constant_frame(100.0, header("BIAS", None, None)));
    }
    h.write_raw("m31.fits", &constant_frame(500.0, header("OBJECT", Some(20.0), None)));

    let out = h.calibrator.run(&raw_source(&h), &[]).unwrap();
    let frame = read_fits(&out.frames[0]).unwrap();
    assert!(mean(&frame.data).abs() < 1e-3);
    // The working-dir intermediate keeps the bias-corrected level.
    assert_abs_diff_eq!(mean(&read_fits(&h.working("m31-b.fits")).unwrap().data), 400.0, epsilon = 1e-3);
    assert!(out.reports.iter().any(|r| r.stage == PipelineStage::Background));
}
