use std::fs::File;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use ndarray::Array2;
use num_traits::ToPrimitive;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::{CalibError, Result};
use crate::frame::{Frame, Header, HeaderValue};

/// Keywords that describe the data layout. They are consumed on read and
/// regenerated on write.
pub(crate) const STRUCTURAL_KEYWORDS: [&str; 9] = [
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "BZERO", "BSCALE",
];

/// Layout of the primary HDU data unit.
#[derive(Clone, Debug)]
pub struct FitsLayout {
    pub bitpix: i32,
    pub width: usize,
    pub height: usize,
    pub bzero: f64,
    pub bscale: f64,
    /// Byte offset of the first data sample (multiple of 2880).
    pub data_offset: usize,
}

impl FitsLayout {
    pub fn bytes_per_sample(&self) -> usize {
        (self.bitpix.unsigned_abs() / 8) as usize
    }

    /// Size of the data unit in bytes, or `None` when it does not fit in
    /// `usize`.
    pub fn data_byte_size(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.bytes_per_sample())
    }
}

/// Memory-mapped reader for the primary HDU of a FITS file.
pub struct FitsReader {
    mmap: Mmap,
    pub layout: FitsLayout,
    pub header: Header,
}

impl FitsReader {
    /// Open a FITS file and parse its primary header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FITS_BLOCK_SIZE {
            return Err(CalibError::InvalidFits(format!(
                "{}: file too small for a FITS header",
                path.display()
            )));
        }

        let (layout, header) = parse_header(&mmap)
            .map_err(|e| CalibError::InvalidFits(format!("{}: {e}", path.display())))?;

        let expected = layout
            .data_byte_size()
            .and_then(|size| size.checked_add(layout.data_offset))
            .ok_or_else(|| {
                CalibError::InvalidFits(format!(
                    "{}: image size {}x{} is too large",
                    path.display(),
                    layout.width,
                    layout.height
                ))
            })?;
        if mmap.len() < expected {
            return Err(CalibError::InvalidFits(format!(
                "{}: file truncated, expected at least {} bytes, got {}",
                path.display(),
                expected,
                mmap.len()
            )));
        }

        Ok(Self {
            mmap,
            layout,
            header,
        })
    }

    /// Raw big-endian bytes of the data unit (zero-copy from mmap).
    pub fn data_raw(&self) -> &[u8] {
        let start = self.layout.data_offset;
        let size = self.layout.data_byte_size().unwrap_or(0);
        &self.mmap[start..start + size]
    }

    /// Decode the image into physical f32 values.
    pub fn read_frame(&self) -> Result<Frame> {
        let data = decode_image(self.data_raw(), &self.layout)?;
        Ok(Frame::with_header(data, self.header.clone()))
    }
}

/// Read the primary image and header of a FITS file.
pub fn read_fits(path: &Path) -> Result<Frame> {
    FitsReader::open(path)?.read_frame()
}

/// Read only the header of a FITS file.
pub fn read_header(path: &Path) -> Result<Header> {
    Ok(FitsReader::open(path)?.header)
}

fn parse_header(buf: &[u8]) -> std::result::Result<(FitsLayout, Header), String> {
    let mut header = Header::new();
    let mut bitpix = None;
    let mut naxis = None;
    let mut axes = [0usize; 3];
    let mut bzero = 0.0;
    let mut bscale = 1.0;
    let mut end_offset = None;

    for (index, raw_card) in buf.chunks_exact(FITS_CARD_SIZE).enumerate() {
        let card: String = raw_card
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect();
        let keyword = card[..8].trim_end().to_uppercase();

        if index == 0 && keyword != "SIMPLE" {
            return Err("missing SIMPLE keyword".into());
        }
        if keyword == "END" {
            end_offset = Some((index + 1) * FITS_CARD_SIZE);
            break;
        }
        if keyword == "HISTORY" {
            header.add_history(card[8..].trim());
            continue;
        }
        if keyword.is_empty() || keyword == "COMMENT" {
            continue;
        }

        let (keyword, value, comment) = if keyword == "HIERARCH" {
            match card[8..].split_once('=') {
                Some((key, rest)) => {
                    let (value, comment) = parse_value(rest);
                    (key.trim().to_uppercase(), value, comment)
                }
                None => continue,
            }
        } else if &card[8..10] == "= " {
            let (value, comment) = parse_value(&card[10..]);
            (keyword, value, comment)
        } else {
            continue;
        };

        match keyword.as_str() {
            "SIMPLE" => {
                if value != HeaderValue::Logical(true) {
                    return Err("SIMPLE is not T".into());
                }
            }
            "BITPIX" => bitpix = value.as_i64(),
            "NAXIS" => naxis = value.as_i64(),
            "NAXIS1" | "NAXIS2" | "NAXIS3" => {
                let axis = (keyword.as_bytes()[5] - b'1') as usize;
                axes[axis] = value
                    .as_i64()
                    .and_then(|v| usize::try_from(v).ok())
                    .ok_or_else(|| format!("invalid {keyword}"))?;
            }
            "BZERO" => bzero = value.as_f64().ok_or("invalid BZERO")?,
            "BSCALE" => bscale = value.as_f64().ok_or("invalid BSCALE")?,
            "EXTEND" => {}
            _ => header.set_with_comment(&keyword, value, comment),
        }
    }

    let end_offset = end_offset.ok_or("missing END card")?;
    let bitpix = i32::try_from(bitpix.ok_or("missing BITPIX")?).map_err(|_| "unsupported BITPIX")?;
    if !matches!(bitpix, 8 | 16 | 32 | 64 | -32 | -64) {
        return Err(format!("unsupported BITPIX {bitpix}"));
    }

    let naxis = naxis.ok_or("missing NAXIS")?;
    let two_dimensional = naxis == 2 || (naxis == 3 && axes[2] == 1);
    if !two_dimensional {
        return Err(format!("only 2-D images are supported (NAXIS={naxis})"));
    }
    let (width, height) = (axes[0], axes[1]);
    if width == 0 || height == 0 {
        return Err(format!("invalid image dimensions {width}x{height}"));
    }
    let sample_bytes = (bitpix.unsigned_abs() / 8) as usize;
    if width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(sample_bytes))
        .is_none()
    {
        return Err(format!("image dimensions {width}x{height} overflow"));
    }

    let data_offset = end_offset.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;
    Ok((
        FitsLayout {
            bitpix,
            width,
            height,
            bzero,
            bscale,
            data_offset,
        },
        header,
    ))
}

/// Parse the value field of a card (everything after `= `).
fn parse_value(field: &str) -> (HeaderValue, Option<String>) {
    let field = field.trim_start();

    if let Some(quoted) = field.strip_prefix('\'') {
        let mut text = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut rest = "";
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    text.push('\'');
                    chars.next();
                } else {
                    rest = &quoted[i + 1..];
                    break;
                }
            } else {
                text.push(c);
            }
        }
        let comment = rest
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return (HeaderValue::Text(text.trim_end().to_string()), comment);
    }

    let (raw, comment) = match field.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (field.trim(), None),
    };

    let value = match raw {
        "T" => HeaderValue::Logical(true),
        "F" => HeaderValue::Logical(false),
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                HeaderValue::Integer(i)
            } else if let Ok(f) = raw.replace(['D', 'd'], "E").parse::<f64>() {
                HeaderValue::Float(f)
            } else {
                HeaderValue::Text(raw.to_string())
            }
        }
    };
    (value, comment)
}

fn decode_image(raw: &[u8], layout: &FitsLayout) -> Result<Array2<f32>> {
    let n = layout.width * layout.height;
    let (bzero, bscale) = (layout.bzero, layout.bscale);

    let samples = match layout.bitpix {
        8 => to_physical(raw, bzero, bscale),
        16 => {
            let mut buf = vec![0i16; n];
            BigEndian::read_i16_into(raw, &mut buf);
            to_physical(&buf, bzero, bscale)
        }
        32 => {
            let mut buf = vec![0i32; n];
            BigEndian::read_i32_into(raw, &mut buf);
            to_physical(&buf, bzero, bscale)
        }
        64 => {
            let mut buf = vec![0i64; n];
            BigEndian::read_i64_into(raw, &mut buf);
            to_physical(&buf, bzero, bscale)
        }
        -32 => {
            let mut buf = vec![0f32; n];
            BigEndian::read_f32_into(raw, &mut buf);
            to_physical(&buf, bzero, bscale)
        }
        -64 => {
            let mut buf = vec![0f64; n];
            BigEndian::read_f64_into(raw, &mut buf);
            to_physical(&buf, bzero, bscale)
        }
        other => {
            return Err(CalibError::InvalidFits(format!(
                "unsupported BITPIX {other}"
            )))
        }
    };

    // FITS stores NAXIS1 (width) as the fastest axis, which is row-major (h, w).
    Array2::from_shape_vec((layout.height, layout.width), samples).map_err(|_| {
        CalibError::InvalidDimensions {
            width: layout.width,
            height: layout.height,
        }
    })
}

fn to_physical<T: ToPrimitive + Copy>(samples: &[T], bzero: f64, bscale: f64) -> Vec<f32> {
    samples
        .iter()
        .map(|s| {
            let v = s.to_f64().unwrap_or(f64::NAN);
            (bzero + bscale * v) as f32
        })
        .collect()
}
