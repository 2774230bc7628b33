//! Input Scanner - Style Folder Discovery
//!
//! One style per immediate subdirectory holding a `desc.txt`. Folders without
//! a description are skipped silently; malformed metadata is an error.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::StyleMeta;

pub const DESCRIPTION_FILE: &str = "desc.txt";

/// Checked in this order; the first one present wins.
pub const META_FILENAMES: [&str; 3] = ["meta.yaml", "meta.yml", "meta.json"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Cannot read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed metadata {path}: {message}")]
    MalformedMeta { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawStyle {
    pub style_code: String,
    pub base_dir: PathBuf,
    pub desc_file: PathBuf,
    pub images: Vec<PathBuf>,
    pub meta: Option<StyleMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaFile {
    style_code: Option<String>,
    price: Option<f64>,
    colors: Vec<String>,
    sizes: Vec<String>,
    stock: Option<u32>,
    macro_delay: Option<(i64, i64)>,
}

impl MetaFile {
    fn into_meta(self, fallback_code: &str) -> StyleMeta {
        StyleMeta {
            style_code: self.style_code.unwrap_or_else(|| fallback_code.to_string()),
            price_override: self.price,
            colors: self.colors,
            sizes: self.sizes,
            stock_per_variant: self.stock,
            macro_delay_override: self.macro_delay,
        }
    }
}

pub struct InputScanner {
    input_root: PathBuf,
}

impl InputScanner {
    pub fn new(input_root: impl Into<PathBuf>) -> Self {
        Self { input_root: input_root.into() }
    }

    /// List candidate folders in lexicographic order. Each call re-reads the
    /// directory, so a fresh iterator restarts the scan.
    pub fn scan(&self) -> Result<StyleIter, ScanError> {
        let entries = fs::read_dir(&self.input_root).map_err(|source| ScanError::Io {
            path: self.input_root.clone(),
            source,
        })?;

        let mut candidates = vec![];
        for entry in entries {
            let entry = entry.map_err(|source| ScanError::Io {
                path: self.input_root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                candidates.push(path);
            }
        }
        candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        info!(root = %self.input_root.display(), candidates = candidates.len(), "Scanning input root");
        Ok(StyleIter { candidates: candidates.into_iter() })
    }
}

/// Lazily loads one style at a time.
pub struct StyleIter {
    candidates: std::vec::IntoIter<PathBuf>,
}

impl Iterator for StyleIter {
    type Item = Result<RawStyle, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        for dir in self.candidates.by_ref() {
            let desc_file = dir.join(DESCRIPTION_FILE);
            if !desc_file.is_file() {
                debug!(dir = %dir.display(), "No description file, skipping");
                continue;
            }
            return Some(load_style(dir, desc_file));
        }
        None
    }
}

fn load_style(dir: PathBuf, desc_file: PathBuf) -> Result<RawStyle, ScanError> {
    let style_code = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let images = list_images(&dir)?;
    let meta = load_meta(&dir, &style_code)?;
    debug!(style = %style_code, images = images.len(), has_meta = meta.is_some(), "Discovered style");
    Ok(RawStyle { style_code, base_dir: dir, desc_file, images, meta })
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let io_err = |source| ScanError::Io { path: dir.to_path_buf(), source };
    let mut images = vec![];
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == "jpg") {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn load_meta(dir: &Path, style_code: &str) -> Result<Option<StyleMeta>, ScanError> {
    for name in META_FILENAMES {
        let path = dir.join(name);
        if path.is_file() {
            return parse_meta(&path, style_code).map(Some);
        }
    }
    Ok(None)
}

fn parse_meta(path: &Path, style_code: &str) -> Result<StyleMeta, ScanError> {
    let content = fs::read_to_string(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let malformed = |message: String| ScanError::MalformedMeta { path: path.to_path_buf(), message };

    let file: MetaFile = if content.trim().is_empty() {
        MetaFile::default()
    } else if path.extension().map_or(false, |e| e.eq_ignore_ascii_case("json")) {
        serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?
    } else {
        serde_yaml::from_str(&content).map_err(|e| malformed(e.to_string()))?
    };
    Ok(file.into_meta(style_code))
}
