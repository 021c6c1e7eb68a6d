use std::fmt;

use crate::consts::UNKNOWN_FILTER;
use crate::frame::Header;
use crate::pipeline::config::HeaderConfig;

/// Role of an exposure, derived from its image-type keyword.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameRole {
    Bias,
    Dark,
    Flat,
    Object,
    /// Anything else, carrying the uppercased label (empty when the keyword
    /// is missing).
    Other(String),
}

impl fmt::Display for FrameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
            Self::Object => write!(f, "object"),
            Self::Other(label) if label.is_empty() => write!(f, "unknown"),
            Self::Other(label) => write!(f, "other ({label})"),
        }
    }
}

/// Uppercased, trimmed value of the role keyword; empty when absent.
pub fn image_role(header: &Header, keyword: &str) -> String {
    header
        .get(keyword)
        .map(|v| v.to_string().trim().to_uppercase())
        .unwrap_or_default()
}

/// Trimmed filter name, `UNKNOWN` when missing or blank.
pub fn filter_name(header: &Header, keyword: &str) -> String {
    let name = header
        .get(keyword)
        .map(|v| v.to_string().trim().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        UNKNOWN_FILTER.to_string()
    } else {
        name
    }
}

/// Exposure time in seconds. Numeric text values are accepted.
pub fn exposure_time(header: &Header, keyword: &str) -> Option<f64> {
    header.get_f64(keyword).filter(|t| t.is_finite())
}

/// Classifies exposures using configured keyword names and role labels.
#[derive(Clone, Debug)]
pub struct FrameClassifier {
    image_type_keyword: String,
    exposure_keyword: String,
    filter_keyword: String,
    bias_label: String,
    dark_label: String,
    flat_label: String,
    object_label: String,
}

impl FrameClassifier {
    pub fn new(config: &HeaderConfig) -> Self {
        let label = |s: &str| s.trim().to_uppercase();
        Self {
            image_type_keyword: config.image_type_keyword.clone(),
            exposure_keyword: config.exposure_keyword.clone(),
            filter_keyword: config.filter_keyword.clone(),
            bias_label: label(&config.bias_label),
            dark_label: label(&config.dark_label),
            flat_label: label(&config.flat_label),
            object_label: label(&config.object_label),
        }
    }

    pub fn role(&self, header: &Header) -> FrameRole {
        let label = image_role(header, &self.image_type_keyword);
        if label == self.bias_label {
            FrameRole::Bias
        } else if label == self.dark_label {
            FrameRole::Dark
        } else if label == self.flat_label {
            FrameRole::Flat
        } else if label == self.object_label {
            FrameRole::Object
        } else {
            FrameRole::Other(label)
        }
    }

    pub fn is(&self, header: &Header, role: &FrameRole) -> bool {
        &self.role(header) == role
    }

    pub fn filter(&self, header: &Header) -> String {
        filter_name(header, &self.filter_keyword)
    }

    pub fn exposure(&self, header: &Header) -> Option<f64> {
        exposure_time(header, &self.exposure_keyword)
    }

    pub fn exposure_keyword(&self) -> &str {
        &self.exposure_keyword
    }

    pub fn filter_keyword(&self) -> &str {
        &self.filter_keyword
    }
}

impl Default for FrameClassifier {
    fn default() -> Self {
        Self::new(&HeaderConfig::default())
    }
}
