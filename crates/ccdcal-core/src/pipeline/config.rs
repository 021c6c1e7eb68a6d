use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_BACKGROUND_BOX, DEFAULT_CLIP_ITERATIONS, DEFAULT_CLIP_SIGMA, DEFAULT_COSMETIC_BOX,
    DEFAULT_MIN_FLATS, MASTER_BIAS_NAME, MASTER_DARK_NAME,
};
use crate::error::{CalibError, Result};

/// Complete run configuration, loaded from TOML. Every section and field is
/// optional and falls back to its default.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibConfig {
    pub header: HeaderConfig,
    pub directories: DirectoryConfig,
    pub bias: BiasConfig,
    pub dark: DarkConfig,
    pub flat: FlatConfig,
    pub overscan: OverscanConfig,
    pub cosmetic: CosmeticConfig,
    pub background: BackgroundConfig,
    pub preview: PreviewConfig,
}

impl CalibConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CalibError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the run directories and the bad pixel mask against `base`,
    /// normally the directory holding the configuration file.
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        self.directories = self.directories.resolved_against(base);
        let mask = &self.cosmetic.bad_pixel_mask;
        if !mask.as_os_str().is_empty() && mask.is_relative() {
            self.cosmetic.bad_pixel_mask = base.join(mask);
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CalibError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let h = &self.header;
        for (name, value) in [
            ("header.image_type_keyword", &h.image_type_keyword),
            ("header.exposure_keyword", &h.exposure_keyword),
            ("header.filter_keyword", &h.filter_keyword),
        ] {
            if value.trim().is_empty() {
                return Err(CalibError::Config(format!("{name} must not be empty")));
            }
        }
        if !(self.bias.sigma > 0.0) {
            return Err(CalibError::Config(format!(
                "bias.sigma must be positive, got {}",
                self.bias.sigma
            )));
        }
        if self.bias.iterations == 0 {
            return Err(CalibError::Config("bias.iterations must be at least 1".into()));
        }
        if self.flat.min_frames == 0 {
            return Err(CalibError::Config("flat.min_frames must be at least 1".into()));
        }
        if self.flat.max_value > 0.0 && self.flat.max_value < self.flat.min_value {
            return Err(CalibError::Config(format!(
                "flat.max_value ({}) is below flat.min_value ({})",
                self.flat.max_value, self.flat.min_value
            )));
        }
        if self.cosmetic.box_size == 0 {
            return Err(CalibError::Config("cosmetic.box_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Header keyword names and the role labels they are compared against.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    pub image_type_keyword: String,
    pub exposure_keyword: String,
    pub filter_keyword: String,
    pub bias_label: String,
    pub dark_label: String,
    pub flat_label: String,
    pub object_label: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            image_type_keyword: "IMAGETYP".into(),
            exposure_keyword: "EXPTIME".into(),
            filter_keyword: "FILTER".into(),
            bias_label: "BIAS".into(),
            dark_label: "DARK".into(),
            flat_label: "FLAT".into(),
            object_label: "OBJECT".into(),
        }
    }
}

/// Run directories. Relative paths are taken relative to the configuration
/// file's directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub working_dir: PathBuf,
    pub results_dir: PathBuf,
    pub aux_dir: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("work"),
            results_dir: PathBuf::from("results"),
            aux_dir: PathBuf::from("results/aux"),
        }
    }
}

impl DirectoryConfig {
    /// Directories rooted at `root`: `work`, `results`, `results/aux`.
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = Self::default();
        Self {
            working_dir: root.join(defaults.working_dir),
            results_dir: root.join(defaults.results_dir),
            aux_dir: root.join(defaults.aux_dir),
        }
    }

    /// Resolve relative entries against `base`.
    pub fn resolved_against(&self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        Self {
            working_dir: resolve(&self.working_dir),
            results_dir: resolve(&self.results_dir),
            aux_dir: resolve(&self.aux_dir),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    pub enabled: bool,
    /// `MedianSigmaClipped`, `Median`, `Mean` or `Average`.
    pub method: String,
    pub sigma: f32,
    pub iterations: usize,
    pub use_library: bool,
    pub library_name: String,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: "MedianSigmaClipped".into(),
            sigma: DEFAULT_CLIP_SIGMA,
            iterations: DEFAULT_CLIP_ITERATIONS,
            use_library: false,
            library_name: MASTER_BIAS_NAME.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DarkConfig {
    pub enabled: bool,
    /// `ScaledExposureMedian`, `ScaledExposureAverage` or `Median`.
    pub method: String,
    pub use_library: bool,
    pub library_name: String,
}

impl Default for DarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: "ScaledExposureMedian".into(),
            use_library: false,
            library_name: MASTER_DARK_NAME.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatConfig {
    pub enabled: bool,
    /// Flats with a mean below this are rejected.
    pub min_value: f64,
    /// Flats with a mean above this are rejected; 0 disables the check.
    pub max_value: f64,
    /// Reject flats whose shape differs from the first flat of their filter.
    pub check_consistency: bool,
    /// Fewest flats needed to build a master for a filter.
    pub min_frames: usize,
    pub use_library: bool,
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_value: 0.0,
            max_value: 0.0,
            check_consistency: false,
            min_frames: DEFAULT_MIN_FLATS,
            use_library: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OverscanConfig {
    pub enabled: bool,
    /// `x1:x2,y1:y2`, zero-based, end-exclusive.
    pub region: String,
    /// `row` or `column`.
    pub mode: String,
}

impl Default for OverscanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: String::new(),
            mode: "row".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmeticConfig {
    pub enabled: bool,
    /// FITS image whose non-zero pixels mark bad pixels.
    pub bad_pixel_mask: PathBuf,
    pub box_size: usize,
}

impl Default for CosmeticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bad_pixel_mask: PathBuf::new(),
            box_size: DEFAULT_COSMETIC_BOX,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub box_size: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            box_size: DEFAULT_BACKGROUND_BOX,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Write a PNG next to every master frame.
    pub masters: bool,
}
