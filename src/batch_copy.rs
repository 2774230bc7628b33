//! Batch Copy - Ship Exported Batches Elsewhere
//!
//! Copies `Output_Batch_Phone_*` directories from an output root to another
//! location, e.g. a removable drive for devices without a bridge.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::partition::{batch_dir_name, copy_tree, BATCH_DIR_PREFIX};

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("No batch directories under {0}")]
    NoBatches(PathBuf),

    #[error("Unknown batches: {}", .0.join(", "))]
    UnknownBatch(Vec<String>),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub copied: Vec<PathBuf>,
    /// Targets left alone because they exist and `overwrite` was off.
    pub conflicts: Vec<PathBuf>,
    /// Dry-run plan as `(source, target)` pairs.
    pub planned: Vec<(PathBuf, PathBuf)>,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

pub fn discover_batches(source: &Path) -> Result<BTreeMap<String, PathBuf>, CopyError> {
    let io_err = |source_err| CopyError::Io { path: source.to_path_buf(), source: source_err };
    let mut batches = BTreeMap::new();
    for entry in fs::read_dir(source).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(BATCH_DIR_PREFIX) && entry.path().is_dir() {
            batches.insert(name, entry.path());
        }
    }
    Ok(batches)
}

/// `"2"` selects `Output_Batch_Phone_2`; anything else is a directory name.
pub fn normalise_selector(selector: &str) -> String {
    match selector.parse::<usize>() {
        Ok(index) => batch_dir_name(index),
        Err(_) => selector.to_string(),
    }
}

/// With no selectors every batch is copied. Unknown selectors fail before
/// anything is written.
pub fn copy_batches(
    source: &Path,
    target: &Path,
    selectors: &[String],
    overwrite: bool,
    dry_run: bool,
) -> Result<CopyReport, CopyError> {
    let batches = discover_batches(source)?;
    if batches.is_empty() {
        return Err(CopyError::NoBatches(source.to_path_buf()));
    }

    let wanted: Vec<String> = if selectors.is_empty() {
        batches.keys().cloned().collect()
    } else {
        selectors.iter().map(|s| normalise_selector(s)).collect()
    };
    let unknown: Vec<String> = wanted.iter().filter(|w| !batches.contains_key(*w)).cloned().collect();
    if !unknown.is_empty() {
        return Err(CopyError::UnknownBatch(unknown));
    }

    if !dry_run {
        fs::create_dir_all(target).map_err(|source| CopyError::Io { path: target.to_path_buf(), source })?;
    }

    let mut report = CopyReport::default();
    for key in wanted {
        let src = &batches[&key];
        let dest = target.join(&key);
        if dry_run {
            info!(from = %src.display(), to = %dest.display(), "[dry-run] copy");
            report.planned.push((src.clone(), dest));
            continue;
        }
        if dest.exists() {
            if !overwrite {
                error!(dest = %dest.display(), "Target exists; pass --overwrite to replace it");
                report.conflicts.push(dest);
                continue;
            }
            debug!(dest = %dest.display(), "Replacing existing target");
            fs::remove_dir_all(&dest).map_err(|source| CopyError::Io { path: dest.clone(), source })?;
        }
        info!(from = %src.display(), to = %dest.display(), "Copying batch");
        copy_tree(src, &dest).map_err(|source| CopyError::Io { path: dest.clone(), source })?;
        report.copied.push(dest);
    }
    Ok(report)
}
