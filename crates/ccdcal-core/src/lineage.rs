use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::consts::LINEAGE_KEYWORD;
use crate::frame::Header;

/// A correction step that leaves a mark on the file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Correction {
    Overscan,
    Bias,
    Dark,
    Flat,
}

impl Correction {
    pub const ALL: [Correction; 4] = [Self::Overscan, Self::Bias, Self::Dark, Self::Flat];

    pub fn letter(self) -> char {
        match self {
            Self::Overscan => 'o',
            Self::Bias => 'b',
            Self::Dark => 'd',
            Self::Flat => 'f',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.letter() == c)
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overscan => write!(f, "overscan"),
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// The corrections a frame has been through, kept in stage order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Lineage {
    steps: Vec<Correction>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lineage with `step` added. Adding a step twice is a no-op.
    pub fn with(&self, step: Correction) -> Self {
        let mut steps = self.steps.clone();
        if !steps.contains(&step) {
            steps.push(step);
            steps.sort();
        }
        Self { steps }
    }

    pub fn contains(&self, step: Correction) -> bool {
        self.steps.contains(&step)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Correction] {
        &self.steps
    }

    /// `"bdf"` for bias, dark and flat.
    pub fn letters(&self) -> String {
        self.steps.iter().map(|s| s.letter()).collect()
    }

    /// Parse a letter string. Letters must be known, unique and in stage
    /// order; anything else is rejected.
    pub fn parse_letters(letters: &str) -> Option<Self> {
        let mut steps = Vec::new();
        for c in letters.chars() {
            let step = Correction::from_letter(c)?;
            if steps.last().is_some_and(|last| *last >= step) {
                return None;
            }
            steps.push(step);
        }
        if steps.is_empty() {
            None
        } else {
            Some(Self { steps })
        }
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letters())
    }
}

/// An exposure on disk together with where it came from and what has been
/// done to it.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub path: PathBuf,
    /// File stem of the raw exposure this record descends from.
    pub origin_stem: String,
    pub lineage: Lineage,
}

impl FrameRecord {
    /// A raw, uncorrected exposure.
    pub fn raw(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let origin_stem = file_stem(&path);
        Self {
            path,
            origin_stem,
            lineage: Lineage::new(),
        }
    }

    /// Rebuild a record from a file written by an earlier run, using the
    /// lineage card in its header. Files without the card are raw.
    pub fn from_header(path: impl Into<PathBuf>, header: &Header) -> Self {
        let path = path.into();
        let lineage = header
            .get_text(LINEAGE_KEYWORD)
            .and_then(|l| Lineage::parse_letters(l.trim()));
        match lineage {
            Some(lineage) => {
                let stem = file_stem(&path);
                let origin_stem = stem
                    .strip_suffix(&format!("-{}", lineage.letters()))
                    .unwrap_or(&stem)
                    .to_string();
                Self {
                    path,
                    origin_stem,
                    lineage,
                }
            }
            None => Self::raw(path),
        }
    }

    /// Rebuild a record from its file name alone (`m31_001-bd.fits`).
    pub fn from_file_name(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stem = file_stem(&path);
        if let Some((origin, letters)) = stem.rsplit_once('-') {
            if let Some(lineage) = Lineage::parse_letters(letters) {
                if !origin.is_empty() {
                    return Self {
                        origin_stem: origin.to_string(),
                        lineage,
                        path,
                    };
                }
            }
        }
        Self::raw(path)
    }

    /// File name for this frame after `lineage`: `<origin>-<letters><ext>`.
    pub fn file_name_for(&self, lineage: &Lineage) -> String {
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".fits".to_string());
        if lineage.is_empty() {
            format!("{}{}", self.origin_stem, ext)
        } else {
            format!("{}-{}{}", self.origin_stem, lineage.letters(), ext)
        }
    }

    /// The record produced by applying `step` and writing into `dir`.
    pub fn derive(&self, step: Correction, dir: &Path) -> Self {
        let lineage = self.lineage.with(step);
        Self {
            path: dir.join(self.file_name_for(&lineage)),
            origin_stem: self.origin_stem.clone(),
            lineage,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Make origin stems unique across one input set so that derived names never
/// collide in the flat working dir. Records sharing a stem are prefixed with
/// their parent directory name (`night1_obj`), falling back to a numeric
/// suffix when that is still taken. Records with a unique stem are left
/// alone. Returns the number of records renamed.
pub fn qualify_duplicate_origins(records: &mut [FrameRecord]) -> usize {
    let mut by_stem: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        by_stem.entry(record.origin_stem.clone()).or_default().push(i);
    }
    let mut taken: HashSet<String> = by_stem.keys().cloned().collect();

    let mut renamed = 0;
    for (stem, members) in by_stem.iter().filter(|(_, m)| m.len() > 1) {
        for &i in members {
            let base = records[i]
                .path
                .parent()
                .and_then(|p| p.file_name())
                .map(|p| format!("{}_{stem}", p.to_string_lossy()))
                .unwrap_or_else(|| stem.clone());
            let mut candidate = base.clone();
            let mut n = 1;
            while taken.contains(&candidate) {
                n += 1;
                candidate = format!("{base}_{n}");
            }
            taken.insert(candidate.clone());
            records[i].origin_stem = candidate;
            renamed += 1;
        }
    }
    renamed
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_follow_stage_order() {
        let l = Lineage::new()
            .with(Correction::Flat)
            .with(Correction::Bias)
            .with(Correction::Dark);
        assert_eq!(l.letters(), "bdf");
    }

    #[test]
    fn parse_rejects_unordered_or_unknown() {
        assert!(Lineage::parse_letters("db").is_none());
        assert!(Lineage::parse_letters("bx").is_none());
        assert!(Lineage::parse_letters("bb").is_none());
        assert!(Lineage::parse_letters("").is_none());
        assert_eq!(Lineage::parse_letters("obdf").map(|l| l.steps().len()), Some(4));
    }

    #[test]
    fn duplicate_stems_get_parent_prefix() {
        let mut records = vec![
            FrameRecord::raw("/data/n1/obj.fits"),
            FrameRecord::raw("/data/n2/obj.fits"),
            FrameRecord::raw("/data/n2/m31.fits"),
        ];
        assert_eq!(qualify_duplicate_origins(&mut records), 2);
        let stems: Vec<&str> = records.iter().map(|r| r.origin_stem.as_str()).collect();
        assert_eq!(stems, ["n1_obj", "n2_obj", "m31"]);
    }

    #[test]
    fn same_parent_name_falls_back_to_index() {
        let mut records = vec![
            FrameRecord::raw("/a/x/obj.fits"),
            FrameRecord::raw("/b/x/obj.fits"),
        ];
        qualify_duplicate_origins(&mut records);
        assert_eq!(records[0].origin_stem, "x_obj");
        assert_eq!(records[1].origin_stem, "x_obj_2");
    }
}
