mod common;

use ccdcal_core::classify::{exposure_time, filter_name, image_role, FrameClassifier, FrameRole};
use ccdcal_core::frame::Header;
use ccdcal_core::pipeline::config::HeaderConfig;

use common::header;

#[test]
fn test_image_role_is_uppercased_and_trimmed() {
    let h = header("  Bias ", None, None);
    assert_eq!(image_role(&h, "IMAGETYP"), "BIAS");
    assert_eq!(image_role(&Header::new(), "IMAGETYP"), "");
}

#[test]
fn test_filter_defaults_to_unknown() {
    assert_eq!(filter_name(&header("FLAT", None, Some(" R ")), "FILTER"), "R");
    assert_eq!(filter_name(&header("FLAT", None, Some("   ")), "FILTER"), "UNKNOWN");
    assert_eq!(filter_name(&header("FLAT", None, None), "FILTER"), "UNKNOWN");
}

#[test]
fn test_exposure_accepts_numeric_text() {
    let mut h = Header::new();
    h.set("EXPTIME", "12.5");
    assert_eq!(exposure_time(&h, "EXPTIME"), Some(12.5));
    h.set("EXPTIME", 3i64);
    assert_eq!(exposure_time(&h, "exptime"), Some(3.0));
    h.set("EXPTIME", "n/a");
    assert_eq!(exposure_time(&h, "EXPTIME"), None);
}

#[test]
fn test_default_labels() {
    let c = FrameClassifier::default();
    assert_eq!(c.role(&header("bias", None, None)), FrameRole::Bias);
    assert_eq!(c.role(&header("Dark", None, None)), FrameRole::Dark);
    assert_eq!(c.role(&header("FLAT", None, None)), FrameRole::Flat);
    assert_eq!(c.role(&header("object", None, None)), FrameRole::Object);
    assert_eq!(
        c.role(&header("Light Frame", None, None)),
        FrameRole::Other("LIGHT FRAME".into())
    );
    assert_eq!(c.role(&Header::new()), FrameRole::Other(String::new()));
}

#[test]
fn test_configured_keywords_and_labels() {
    let config = HeaderConfig {
        image_type_keyword: "FRAMETYP".into(),
        exposure_keyword: "EXPOSURE".into(),
        filter_keyword: "FILT".into(),
        bias_label: "Bias Frame".into(),
        dark_label: "Dark Frame".into(),
        flat_label: "Flat Field".into(),
        object_label: "Light Frame".into(),
    };
    let c = FrameClassifier::new(&config);

    let mut h = Header::new();
    h.set("FRAMETYP", "LIGHT FRAME");
    h.set("EXPOSURE", 60.0f64);
    h.set("FILT", "Ha");
    assert!(c.is(&h, &FrameRole::Object));
    assert_eq!(c.exposure(&h), Some(60.0));
    assert_eq!(c.filter(&h), "Ha");

    // The default keyword is not consulted.
    let h = header("BIAS", None, None);
    assert_eq!(c.role(&h), FrameRole::Other(String::new()));
}

#[test]
fn test_role_display() {
    assert_eq!(FrameRole::Flat.to_string(), "flat");
    assert_eq!(FrameRole::Other(String::new()).to_string(), "unknown");
}
