use std::fmt;

use ndarray::Array2;

/// A single 2-D exposure with its primary-HDU header.
/// Pixel values are f32 in physical units (ADU after BZERO/BSCALE).
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    pub header: Header,
}

impl Frame {
    pub fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            header: Header::default(),
        }
    }

    pub fn with_header(data: Array2<f32>, header: Header) -> Self {
        Self { data, header }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// (height, width), matching `Array2::dim`.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }
}

/// Value of a FITS header card.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Logical(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

/// Header values render the way their text is compared: strings bare,
/// logicals as `T`/`F`.
impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<usize> for HeaderValue {
    fn from(v: usize) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for HeaderValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Logical(v)
    }
}

/// One keyword card.
#[derive(Clone, Debug, PartialEq)]
pub struct Card {
    pub keyword: String,
    pub value: HeaderValue,
    pub comment: Option<String>,
}

/// Ordered keyword cards plus HISTORY lines.
///
/// Structural keywords (SIMPLE, BITPIX, NAXISn, BZERO, ...) are consumed by
/// the reader and regenerated by the writer, so they never appear here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
    history: Vec<String>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        let key = keyword.trim().to_uppercase();
        self.cards
            .iter()
            .find(|c| c.keyword == key)
            .map(|c| &c.value)
    }

    pub fn get_text(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(|v| v.as_text())
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(|v| v.as_bool())
    }

    /// Insert or replace a card, keeping the original position on replace.
    pub fn set(&mut self, keyword: &str, value: impl Into<HeaderValue>) {
        self.set_with_comment(keyword, value, None::<String>);
    }

    pub fn set_with_comment(
        &mut self,
        keyword: &str,
        value: impl Into<HeaderValue>,
        comment: Option<impl Into<String>>,
    ) {
        let key = keyword.trim().to_uppercase();
        let value = value.into();
        let comment = comment.map(Into::into);
        if let Some(card) = self.cards.iter_mut().find(|c| c.keyword == key) {
            card.value = value;
            if comment.is_some() {
                card.comment = comment;
            }
        } else {
            self.cards.push(Card {
                keyword: key,
                value,
                comment,
            });
        }
    }

    pub fn remove(&mut self, keyword: &str) -> Option<HeaderValue> {
        let key = keyword.trim().to_uppercase();
        let pos = self.cards.iter().position(|c| c.keyword == key)?;
        Some(self.cards.remove(pos).value)
    }

    pub fn add_history(&mut self, line: impl Into<String>) {
        self.history.push(line.into());
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty() && self.history.is_empty()
    }
}
