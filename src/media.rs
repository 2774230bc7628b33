//! Image classification by filename.
//!
//! Grammar over the file stem:
//!
//! ```text
//! variant      := "color_" NAME [ "_" ANY ]     NAME = one or more chars, no '_'
//! unclassified := "color_" [ "_" ANY ]          (prefix present, empty NAME)
//! primary      := any stem not starting with "color_"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const VARIANT_PREFIX: &str = "color_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageKind {
    Primary,
    Variant(String),
    Unclassified,
}

pub fn classify(path: &Path) -> ImageKind {
    let stem = match path.file_stem() {
        Some(stem) => stem.to_string_lossy(),
        None => return ImageKind::Unclassified,
    };
    let rest = match stem.strip_prefix(VARIANT_PREFIX) {
        Some(rest) => rest,
        None => return ImageKind::Primary,
    };
    match rest.split('_').next() {
        Some(name) if !name.is_empty() => ImageKind::Variant(name.to_string()),
        _ => ImageKind::Unclassified,
    }
}

/// Images bucketed by kind, each bucket in insertion order until `sorted`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaGroups {
    pub primary: Vec<PathBuf>,
    pub variants: BTreeMap<String, Vec<PathBuf>>,
    pub unclassified: Vec<PathBuf>,
}

impl MediaGroups {
    pub fn push(&mut self, path: PathBuf) {
        match classify(&path) {
            ImageKind::Primary => self.primary.push(path),
            ImageKind::Variant(name) => self.variants.entry(name).or_default().push(path),
            ImageKind::Unclassified => self.unclassified.push(path),
        }
    }

    pub fn sorted(mut self) -> Self {
        for paths in self.variants.values_mut() {
            paths.sort();
        }
        self
    }
}
