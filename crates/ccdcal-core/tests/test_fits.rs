mod common;

use std::io::Write;

use ccdcal_core::error::CalibError;
use ccdcal_core::frame::{Frame, Header, HeaderValue};
use ccdcal_core::io::fits::{read_fits, read_header, FitsReader};
use ccdcal_core::io::fits_writer::{encode_header, write_fits};
use ndarray::Array2;

/// Raw FITS bytes: header cards, END, padding, then `data` padded to 2880.
fn raw_fits(cards: &[&str], data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    for card in cards.iter().chain(std::iter::once(&"END")) {
        let mut c = card.as_bytes().to_vec();
        c.resize(80, b' ');
        buf.extend_from_slice(&c);
    }
    buf.resize(buf.len().div_ceil(2880) * 2880, b' ');
    buf.extend_from_slice(data);
    buf.resize(buf.len().div_ceil(2880) * 2880, 0);
    buf
}

fn card(keyword: &str, value: &str) -> String {
    format!("{keyword:<8}= {value:>20}")
}

// ---------------------------------------------------------------------------
// Round trip through the writer
// ---------------------------------------------------------------------------

#[test]
fn test_write_then_read_preserves_pixels_and_cards() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.fits");

    let data = Array2::from_shape_fn((3, 5), |(r, c)| (r * 10 + c) as f32 - 7.25);
    let mut header = Header::new();
    header.set_with_comment("IMAGETYP", "Light Frame", Some("type"));
    header.set("EXPTIME", 30.0f64);
    header.set("NCOMBINE", 4i64);
    header.set("MF_NORM", true);
    header.set("OBSERVER", "O'Brien");
    header.add_history("first step");
    write_fits(&Frame::with_header(data.clone(), header), &path).unwrap();

    let frame = read_fits(&path).unwrap();
    assert_eq!(frame.shape(), (3, 5));
    assert_eq!(frame.data, data);
    assert_eq!(frame.header.get_text("IMAGETYP"), Some("Light Frame"));
    assert_eq!(frame.header.get("EXPTIME"), Some(&HeaderValue::Float(30.0)));
    assert_eq!(frame.header.get("NCOMBINE"), Some(&HeaderValue::Integer(4)));
    assert_eq!(frame.header.get_bool("MF_NORM"), Some(true));
    assert_eq!(frame.header.get_text("OBSERVER"), Some("O'Brien"));
    assert_eq!(frame.header.history(), ["first step"]);
    assert_eq!(frame.header.cards()[0].comment.as_deref(), Some("type"));
}

#[test]
fn test_file_size_is_block_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aligned.fits");
    write_fits(&Frame::new(Array2::zeros((7, 9))), &path).unwrap();
    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len % 2880, 0);
}

#[test]
fn test_long_keywords_round_trip_as_hierarch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hierarch.fits");
    let mut header = Header::new();
    header.set("MD_PERSEC", true);
    write_fits(&Frame::with_header(Array2::zeros((2, 2)), header), &path).unwrap();

    let header = read_header(&path).unwrap();
    assert_eq!(header.get_bool("MD_PERSEC"), Some(true));
}

#[test]
fn test_structural_cards_are_not_duplicated() {
    let mut header = Header::new();
    header.set("BITPIX", 16i64);
    header.set("NAXIS1", 99i64);
    let bytes = encode_header(&header, 4, 3);
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(text.matches("BITPIX").count(), 1);
    assert!(text.contains(&card("NAXIS1", "4")));
}

#[test]
fn test_long_history_is_split_over_cards() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.fits");
    let mut header = Header::new();
    header.add_history("x".repeat(100));
    write_fits(&Frame::with_header(Array2::zeros((2, 2)), header), &path).unwrap();

    let header = read_header(&path).unwrap();
    assert_eq!(header.history().len(), 2);
    assert_eq!(header.history()[0].len() + header.history()[1].len(), 100);
}

// ---------------------------------------------------------------------------
// Reading foreign files
// ---------------------------------------------------------------------------

#[test]
fn test_reads_16_bit_with_bzero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("u16.fits");

    // Unsigned 16-bit stored as signed with BZERO 32768.
    let stored: [i16; 4] = [-32768, -32767, 0, 32767];
    let mut data = Vec::new();
    for v in stored {
        data.extend_from_slice(&v.to_be_bytes());
    }
    let cards = [
        card("SIMPLE", "T"),
        card("BITPIX", "16"),
        card("NAXIS", "2"),
        card("NAXIS1", "2"),
        card("NAXIS2", "2"),
        card("BZERO", "32768"),
        card("BSCALE", "1"),
        "IMAGETYP= 'Bias Frame'".to_string(),
    ];
    let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
    std::fs::write(&path, raw_fits(&refs, &data)).unwrap();

    let frame = read_fits(&path).unwrap();
    assert_eq!(frame.data[[0, 0]], 0.0);
    assert_eq!(frame.data[[0, 1]], 1.0);
    assert_eq!(frame.data[[1, 0]], 32768.0);
    assert_eq!(frame.data[[1, 1]], 65535.0);
    assert!(frame.header.get("BZERO").is_none());
    assert_eq!(frame.header.get_text("IMAGETYP"), Some("Bias Frame"));
}

#[test]
fn test_accepts_degenerate_third_axis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.fits");
    let data: Vec<u8> = [1u8, 2, 3, 4, 5, 6].to_vec();
    let cards = [
        card("SIMPLE", "T"),
        card("BITPIX", "8"),
        card("NAXIS", "3"),
        card("NAXIS1", "3"),
        card("NAXIS2", "2"),
        card("NAXIS3", "1"),
    ];
    let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
    std::fs::write(&path, raw_fits(&refs, &data)).unwrap();

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!((reader.layout.width, reader.layout.height), (3, 2));
    let frame = reader.read_frame().unwrap();
    assert_eq!(frame.data[[1, 2]], 6.0);
}

#[test]
fn test_rejects_real_cube() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.fits");
    let cards = [
        card("SIMPLE", "T"),
        card("BITPIX", "8"),
        card("NAXIS", "3"),
        card("NAXIS1", "2"),
        card("NAXIS2", "2"),
        card("NAXIS3", "2"),
    ];
    let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
    std::fs::write(&path, raw_fits(&refs, &[0u8; 8])).unwrap();

    assert!(matches!(read_fits(&path), Err(CalibError::InvalidFits(_))));
}

#[test]
fn test_rejects_truncated_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.fits");
    let cards = [
        card("SIMPLE", "T"),
        card("BITPIX", "-32"),
        card("NAXIS", "2"),
        card("NAXIS1", "100"),
        card("NAXIS2", "100"),
    ];
    let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
    let mut bytes = raw_fits(&refs, &[]);
    bytes.truncate(2880 + 100);
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(read_fits(&path), Err(CalibError::InvalidFits(_))));
}

#[test]
fn test_rejects_dimensions_that_overflow() {
    let dir = tempfile::tempdir().unwrap();
    for (bitpix, side) in [("16", "4294967296"), ("64", "2147483648")] {
        let path = dir.path().join(format!("huge_{bitpix}.fits"));
        let cards = [
            card("SIMPLE", "T"),
            card("BITPIX", bitpix),
            card("NAXIS", "2"),
            card("NAXIS1", side),
            card("NAXIS2", side),
        ];
        let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
        std::fs::write(&path, raw_fits(&refs, &[0u8; 16])).unwrap();

        assert!(matches!(read_fits(&path), Err(CalibError::InvalidFits(_))), "BITPIX {bitpix}");
        assert!(matches!(read_header(&path), Err(CalibError::InvalidFits(_))));
    }
}

#[test]
fn test_huge_image_without_data_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.fits");
    let cards = [
        card("SIMPLE", "T"),
        card("BITPIX", "8"),
        card("NAXIS", "2"),
        card("NAXIS1", "1000000"),
        card("NAXIS2", "1000000"),
    ];
    let refs: Vec<&str> = cards.iter().map(String::as_str).collect();
    std::fs::write(&path, raw_fits(&refs, &[0u8; 16])).unwrap();

    assert!(matches!(read_fits(&path), Err(CalibError::InvalidFits(_))));
}

#[test]
fn test_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.fits");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&[0xAB; 4000]).unwrap();
    drop(f);

    assert!(matches!(read_fits(&path), Err(CalibError::InvalidFits(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = read_fits(&dir.path().join("nope.fits"));
    assert!(matches!(result, Err(CalibError::Io(_))));
}
