//! Manifests - Per-Style Records and Entry Shapes
//!
//! `ManifestEntry` is the in-memory unit of work. `StyleManifest` is its
//! on-disk companion (`manifest.json`). `EntryRecord` is the shape shared by
//! batch manifests and the delivery report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::copywriting::GenerationContext;

pub const STYLE_MANIFEST_FILE: &str = "manifest.json";
pub const TEXT_DIR: &str = "text";
pub const IMAGE_DIR: &str = "images";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One processed style. `device_id` stays empty until partitioning, which
/// produces a new entry through [`ManifestEntry::assigned_to`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub style_code: String,
    pub device_id: String,
    pub output_dir: PathBuf,
    pub title_file: PathBuf,
    pub description_files: Vec<PathBuf>,
    pub primary_images: Vec<PathBuf>,
    pub variant_images: BTreeMap<String, Vec<PathBuf>>,
    pub unclassified_images: Vec<PathBuf>,
    pub price: f64,
    pub stock_per_variant: Option<u32>,
    pub macro_delay_range: (i64, i64),
}

impl ManifestEntry {
    pub fn assigned_to(&self, device_id: &str) -> Self {
        Self { device_id: device_id.to_string(), ..self.clone() }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(STYLE_MANIFEST_FILE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: i64,
    pub max: i64,
}

impl From<(i64, i64)> for DelayRange {
    fn from((min, max): (i64, i64)) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMedia {
    pub name: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlock {
    pub primary: Vec<String>,
    pub variants: Vec<VariantMedia>,
    #[serde(default)]
    pub unclassified: Vec<String>,
}

impl MediaBlock {
    /// Build from the entry's images, naming each through `name`.
    fn from_entry(entry: &ManifestEntry, name: impl Fn(&Path) -> String) -> Self {
        Self {
            primary: entry.primary_images.iter().map(|p| name(p)).collect(),
            variants: entry
                .variant_images
                .iter()
                .map(|(color, paths)| VariantMedia {
                    name: color.clone(),
                    images: paths.iter().map(|p| name(p)).collect(),
                })
                .collect(),
            unclassified: entry.unclassified_images.iter().map(|p| name(p)).collect(),
        }
    }
}

/// `manifest.json` inside each style's staging directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleManifest {
    pub style_code: String,
    #[serde(default)]
    pub context: GenerationContext,
    #[serde(default)]
    pub sensitive_hits: Vec<String>,
    pub price: f64,
    pub stock_per_variant: Option<u32>,
    pub macro_delay: DelayRange,
    pub media: MediaBlock,
}

impl StyleManifest {
    pub fn new(entry: &ManifestEntry, context: GenerationContext, sensitive_hits: Vec<String>) -> Self {
        Self {
            style_code: entry.style_code.clone(),
            context,
            sensitive_hits,
            price: entry.price,
            stock_per_variant: entry.stock_per_variant,
            macro_delay: entry.macro_delay_range.into(),
            media: MediaBlock::from_entry(entry, file_name),
        }
    }

    pub fn write(&self, style_dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = style_dir.join(STYLE_MANIFEST_FILE);
        write_json(&path, self)?;
        Ok(path)
    }

    pub fn read(style_dir: &Path) -> Result<Self, ManifestError> {
        let path = style_dir.join(STYLE_MANIFEST_FILE);
        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ManifestError::Json { path, source })
    }

    /// Recorded hits from any `manifest.json` carrying a `sensitive_hits`
    /// list; absent or malformed files yield none.
    pub fn recorded_hits(style_dir: &Path) -> Vec<String> {
        let path = style_dir.join(STYLE_MANIFEST_FILE);
        let Ok(content) = fs::read_to_string(&path) else {
            return vec![];
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) => value
                .get("sensitive_hits")
                .and_then(|hits| hits.as_array())
                .map(|hits| hits.iter().filter_map(|h| h.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed style manifest");
                vec![]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPaths {
    pub root: String,
    pub title: String,
    pub descriptions: Vec<String>,
    pub meta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub price: f64,
    pub stock_per_variant: Option<u32>,
    pub macro_delay: DelayRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub sensitive_hits: Vec<String>,
    pub needs_manual_review: bool,
}

/// One style as listed in a batch manifest or the delivery report. Paths
/// are relative to the batch directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub style_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub paths: EntryPaths,
    pub media: MediaBlock,
    pub pricing: Pricing,
    pub flags: Flags,
}

impl EntryRecord {
    /// Sensitive hits come from the style's own manifest on disk.
    pub fn from_entry(entry: &ManifestEntry) -> Self {
        let hits = StyleManifest::recorded_hits(&entry.output_dir);
        let code = entry.style_code.as_str();
        let text_path = |p: &Path| format!("{}/{}/{}", code, TEXT_DIR, file_name(p));
        let image_path = |p: &Path| format!("{}/{}/{}", code, IMAGE_DIR, file_name(p));

        Self {
            style_code: code.to_string(),
            device_id: None,
            paths: EntryPaths {
                root: code.to_string(),
                title: text_path(&entry.title_file),
                descriptions: entry.description_files.iter().map(|p| text_path(p)).collect(),
                meta: format!("{}/{}", code, STYLE_MANIFEST_FILE),
            },
            media: MediaBlock::from_entry(entry, image_path),
            pricing: Pricing {
                price: entry.price,
                stock_per_variant: entry.stock_per_variant,
                macro_delay: entry.macro_delay_range.into(),
            },
            flags: Flags {
                needs_manual_review: !hits.is_empty(),
                sensitive_hits: hits,
            },
        }
    }

    pub fn with_device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Pretty JSON, UTF-8, trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ManifestError> {
    let mut json = serde_json::to_string_pretty(value).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    json.push('\n');
    fs::write(path, json).map_err(|source| ManifestError::Io { path: path.to_path_buf(), source })
}
