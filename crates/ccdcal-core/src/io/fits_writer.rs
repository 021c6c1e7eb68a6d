use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::Result;
use crate::frame::{Frame, Header, HeaderValue};
use crate::io::fits::STRUCTURAL_KEYWORDS;

/// Longest HISTORY text that fits in one card.
const HISTORY_WIDTH: usize = FITS_CARD_SIZE - 8;

/// Write a frame as a single-HDU FITS file with 32-bit float data.
/// An existing file at `path` is replaced.
pub fn write_fits(frame: &Frame, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header_bytes = encode_header(&frame.header, frame.width(), frame.height());
    writer.write_all(&header_bytes)?;

    for &v in frame.data.iter() {
        writer.write_f32::<BigEndian>(v)?;
    }
    let data_len = frame.data.len() * std::mem::size_of::<f32>();
    write_padding(&mut writer, data_len, 0u8)?;

    writer.flush()?;
    Ok(())
}

/// Encode the primary header, padded with blanks to a whole block.
pub fn encode_header(header: &Header, width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(FITS_BLOCK_SIZE);

    push_card(&mut out, &fixed_card("SIMPLE", &HeaderValue::Logical(true), None));
    push_card(&mut out, &fixed_card("BITPIX", &HeaderValue::Integer(-32), None));
    push_card(&mut out, &fixed_card("NAXIS", &HeaderValue::Integer(2), None));
    push_card(&mut out, &fixed_card("NAXIS1", &HeaderValue::Integer(width as i64), None));
    push_card(&mut out, &fixed_card("NAXIS2", &HeaderValue::Integer(height as i64), None));

    for card in header.cards() {
        if STRUCTURAL_KEYWORDS.contains(&card.keyword.as_str()) {
            continue;
        }
        let text = if card.keyword.len() <= 8 {
            fixed_card(&card.keyword, &card.value, card.comment.as_deref())
        } else {
            hierarch_card(&card.keyword, &card.value)
        };
        push_card(&mut out, &text);
    }

    for line in header.history() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            push_card(&mut out, "HISTORY");
        }
        for chunk in chars.chunks(HISTORY_WIDTH) {
            let text: String = chunk.iter().collect();
            push_card(&mut out, &format!("HISTORY {text}"));
        }
    }

    push_card(&mut out, "END");
    let len = out.len();
    out.resize(len.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE, b' ');
    out
}

fn push_card(out: &mut Vec<u8>, text: &str) {
    let mut bytes: Vec<u8> = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
        .take(FITS_CARD_SIZE)
        .collect();
    bytes.resize(FITS_CARD_SIZE, b' ');
    out.extend_from_slice(&bytes);
}

/// Fixed-format card: strings start at column 11, other values are
/// right-justified to column 30.
fn fixed_card(keyword: &str, value: &HeaderValue, comment: Option<&str>) -> String {
    let mut card = format!("{:<8}= {}", keyword, format_value(value));
    if let Some(comment) = comment {
        card.push_str(" / ");
        card.push_str(comment);
    }
    card
}

fn hierarch_card(keyword: &str, value: &HeaderValue) -> String {
    format!("HIERARCH {} = {}", keyword, format_value(value).trim_start())
}

fn format_value(value: &HeaderValue) -> String {
    match value {
        HeaderValue::Text(s) => {
            let escaped = s.replace('\'', "''");
            format!("'{escaped:<8}'")
        }
        HeaderValue::Integer(i) => format!("{i:>20}"),
        HeaderValue::Float(f) if !f.is_finite() => format!("'{f}'"),
        HeaderValue::Float(f) => format!("{:>20}", format_float(*f)),
        HeaderValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
    }
}

/// Floats always carry a decimal point or exponent so they read back as
/// floats rather than integers.
fn format_float(v: f64) -> String {
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e15).contains(&abs) {
        format!("{v:E}")
    } else if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn write_padding(w: &mut impl Write, written: usize, fill: u8) -> Result<()> {
    let remainder = written % FITS_BLOCK_SIZE;
    if remainder != 0 {
        w.write_all(&vec![fill; FITS_BLOCK_SIZE - remainder])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_block_aligned() {
        let mut h = Header::new();
        h.set("IMAGETYP", "Bias");
        let bytes = encode_header(&h, 4, 3);
        assert_eq!(bytes.len() % FITS_BLOCK_SIZE, 0);
        assert!(bytes.starts_with(b"SIMPLE  =                    T"));
    }

    #[test]
    fn floats_keep_decimal_point() {
        assert_eq!(format_float(100.0), "100.0");
        assert_eq!(format_float(2.5), "2.5");
        assert!(format_float(1e-9).contains('E'));
    }

    #[test]
    fn long_keywords_use_hierarch() {
        let card = hierarch_card("MD_PERSEC", &HeaderValue::Logical(true));
        assert_eq!(card, "HIERARCH MD_PERSEC = T");
    }
}
