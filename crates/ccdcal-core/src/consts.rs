/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// FITS logical record size in bytes.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// FITS header card size in bytes.
pub const FITS_CARD_SIZE: usize = 80;

/// Recognised FITS file extensions (compared case-insensitively).
pub const FITS_EXTENSIONS: [&str; 3] = ["fits", "fit", "fts"];

/// Filter name used when the filter keyword is missing or blank.
pub const UNKNOWN_FILTER: &str = "UNKNOWN";

/// Header keyword holding the lineage letters of a written frame.
pub const LINEAGE_KEYWORD: &str = "CALSTAGE";

/// Default sigma for sigma-clipped combination.
pub const DEFAULT_CLIP_SIGMA: f32 = 2.5;

/// Default maximum number of clipping passes.
pub const DEFAULT_CLIP_ITERATIONS: usize = 5;

/// Smallest allowed box-filter size for background modelling.
pub const MIN_BACKGROUND_BOX: usize = 3;

/// Box size used to estimate replacement values for bad pixels.
pub const DEFAULT_COSMETIC_BOX: usize = 3;

/// Default box size for background modelling.
pub const DEFAULT_BACKGROUND_BOX: usize = 64;

/// Default minimum number of flats per filter.
pub const DEFAULT_MIN_FLATS: usize = 2;

/// Fixed master file names.
pub const MASTER_BIAS_NAME: &str = "masterbias.fits";
pub const MASTER_DARK_NAME: &str = "masterdark.fits";

/// Percentiles used to stretch PNG previews of master frames.
pub const PREVIEW_LOW_PERCENTILE: f32 = 0.005;
pub const PREVIEW_HIGH_PERCENTILE: f32 = 0.995;
