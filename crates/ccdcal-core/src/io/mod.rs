pub mod fits;
pub mod fits_writer;
pub mod preview;
pub mod sources;

pub use fits::{read_fits, read_header, FitsReader};
pub use fits_writer::write_fits;
