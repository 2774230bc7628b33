//! Task Partitioner - Round-Robin Device Batches
//!
//! Entries go to devices by arrival index modulo device count. Export copies
//! each style's staging directory into `Output_Batch_Phone_<n>` (1-based)
//! and writes a self-hashed `batch_manifest.json`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::KitchenConfig;
use crate::hashing::compute_manifest_hash;
use crate::manifest::{write_json, EntryRecord, ManifestEntry, ManifestError};

pub const BATCH_DIR_PREFIX: &str = "Output_Batch_Phone_";
pub const BATCH_MANIFEST_FILE: &str = "batch_manifest.json";

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("No devices configured")]
    NoDevices,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Manifest hashing failed: {0}")]
    Hash(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskBatch {
    pub device_id: String,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub device_id: String,
    pub batch_id: String,
    pub generated_at: String,
    pub count: usize,
    pub entries: Vec<EntryRecord>,
    #[serde(default)]
    pub manifest_hash: String,
}

impl BatchManifest {
    pub fn build(batch: &TaskBatch, index: usize, generated_at: DateTime<Utc>) -> Result<Self, PartitionError> {
        let mut manifest = Self {
            device_id: batch.device_id.clone(),
            batch_id: format!(
                "{}-{:02}-{}",
                batch.device_id,
                index,
                generated_at.format("%Y%m%dT%H%M%SZ")
            ),
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            count: batch.entries.len(),
            entries: batch.entries.iter().map(EntryRecord::from_entry).collect(),
            manifest_hash: String::new(),
        };
        manifest.manifest_hash = compute_manifest_hash(&manifest)?;
        Ok(manifest)
    }
}

pub fn batch_dir_name(index: usize) -> String {
    format!("{}{}", BATCH_DIR_PREFIX, index)
}

pub struct TaskPartitioner {
    device_ids: Vec<String>,
    output_root: PathBuf,
}

impl TaskPartitioner {
    pub fn new(device_ids: Vec<String>, output_root: impl Into<PathBuf>) -> Self {
        Self { device_ids, output_root: output_root.into() }
    }

    pub fn from_config(config: &KitchenConfig) -> Self {
        Self::new(config.device_assignment.device_ids.clone(), &config.output_root)
    }

    /// One batch per device, in configured order, even when empty.
    pub fn partition(&self, entries: &[ManifestEntry]) -> Result<Vec<TaskBatch>, PartitionError> {
        if self.device_ids.is_empty() {
            return Err(PartitionError::NoDevices);
        }
        let mut batches: Vec<TaskBatch> = self
            .device_ids
            .iter()
            .map(|device_id| TaskBatch { device_id: device_id.clone(), entries: vec![] })
            .collect();
        let devices = batches.len();
        for (i, entry) in entries.iter().enumerate() {
            let batch = &mut batches[i % devices];
            batch.entries.push(entry.assigned_to(&batch.device_id));
        }
        for batch in &batches {
            debug!(device = %batch.device_id, count = batch.entries.len(), "Batch assigned");
        }
        Ok(batches)
    }

    pub fn export(&self, batches: &[TaskBatch]) -> Result<Vec<PathBuf>, PartitionError> {
        self.export_at(batches, Utc::now())
    }

    /// Re-running with the same batches and timestamp reproduces the output.
    pub fn export_at(
        &self,
        batches: &[TaskBatch],
        generated_at: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>, PartitionError> {
        let mut dirs = Vec::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            let index = i + 1;
            let batch_dir = self.output_root.join(batch_dir_name(index));
            fs::create_dir_all(&batch_dir).map_err(|source| PartitionError::Io {
                path: batch_dir.clone(),
                source,
            })?;

            for entry in &batch.entries {
                let target = batch_dir.join(&entry.style_code);
                if target.exists() {
                    fs::remove_dir_all(&target)
                        .map_err(|source| PartitionError::Io { path: target.clone(), source })?;
                }
                copy_tree(&entry.output_dir, &target)
                    .map_err(|source| PartitionError::Io { path: target.clone(), source })?;
            }

            let manifest = BatchManifest::build(batch, index, generated_at)?;
            write_json(&batch_dir.join(BATCH_MANIFEST_FILE), &manifest)?;
            info!(
                device = %batch.device_id,
                batch_id = %manifest.batch_id,
                count = manifest.count,
                dir = %batch_dir.display(),
                "Batch exported"
            );
            dirs.push(batch_dir);
        }
        Ok(dirs)
    }
}

/// Recursive copy; `target` must not exist yet or be a directory.
pub fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    let mut children = fs::read_dir(source)?.collect::<std::io::Result<Vec<_>>>()?;
    children.sort_by_key(|e| e.file_name());
    for child in children {
        let from = child.path();
        let to = target.join(child.file_name());
        if child.file_type()?.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::verify_manifest_hash;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn staged_entry(staging: &Path, code: &str) -> ManifestEntry {
        let dir = staging.join(code);
        fs::create_dir_all(dir.join("text")).unwrap();
        fs::write(dir.join("text/title.txt"), format!("{} title", code)).unwrap();
        ManifestEntry {
            style_code: code.to_string(),
            device_id: String::new(),
            output_dir: dir.clone(),
            title_file: dir.join("text/title.txt"),
            description_files: vec![],
            primary_images: vec![],
            variant_images: BTreeMap::new(),
            unclassified_images: vec![],
            price: 100.0,
            stock_per_variant: None,
            macro_delay_range: (10, 45),
        }
    }

    fn devices(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("dev{}", i)).collect()
    }

    #[test]
    fn test_no_devices_is_an_error() {
        let partitioner = TaskPartitioner::new(vec![], "/tmp/unused");
        assert!(matches!(partitioner.partition(&[]), Err(PartitionError::NoDevices)));
    }

    #[test]
    fn test_round_robin_is_balanced() {
        let tmp = TempDir::new().unwrap();
        for (n, d) in [(0, 3), (1, 3), (7, 3), (9, 3), (5, 1), (4, 6)] {
            let entries: Vec<_> =
                (0..n).map(|i| staged_entry(tmp.path(), &format!("S{:02}", i))).collect();
            let batches = TaskPartitioner::new(devices(d), tmp.path()).partition(&entries).unwrap();

            assert_eq!(batches.len(), d);
            let ids: Vec<_> = batches.iter().map(|b| b.device_id.clone()).collect();
            assert_eq!(ids, devices(d));
            let sizes: Vec<_> = batches.iter().map(|b| b.entries.len()).collect();
            assert_eq!(sizes.iter().sum::<usize>(), n);
            assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
            for batch in &batches {
                assert!(batch.entries.iter().all(|e| e.device_id == batch.device_id));
            }
        }
    }

    #[test]
    fn test_assignment_follows_arrival_order() {
        let tmp = TempDir::new().unwrap();
        let entries: Vec<_> = ["A", "B", "C", "D"].iter().map(|c| staged_entry(tmp.path(), c)).collect();
        let batches = TaskPartitioner::new(devices(3), tmp.path()).partition(&entries).unwrap();
        let codes: Vec<Vec<_>> = batches
            .iter()
            .map(|b| b.entries.iter().map(|e| e.style_code.as_str()).collect())
            .collect();
        assert_eq!(codes, vec![vec!["A", "D"], vec!["B"], vec!["C"]]);
        assert!(entries.iter().all(|e| e.device_id.is_empty()));
    }

    #[test]
    fn test_export_writes_batches() {
        let staging = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let entries: Vec<_> = ["A", "B"].iter().map(|c| staged_entry(staging.path(), c)).collect();
        let partitioner = TaskPartitioner::new(devices(2), out.path());
        let batches = partitioner.partition(&entries).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();

        let dirs = partitioner.export_at(&batches, at).unwrap();
        assert_eq!(dirs[0], out.path().join("Output_Batch_Phone_1"));
        assert!(dirs[1].join("B/text/title.txt").is_file());

        let raw = fs::read_to_string(dirs[0].join(BATCH_MANIFEST_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["batch_id"], "dev1-01-20250301T083000Z");
        assert_eq!(value["generated_at"], "2025-03-01T08:30:00Z");
        assert_eq!(value["count"], 1);
        assert_eq!(value["entries"][0]["paths"]["title"], "A/text/title.txt");
        assert_eq!(value["entries"][0]["flags"]["needs_manual_review"], false);
        assert_eq!(verify_manifest_hash(&value), Some(true));
    }

    #[test]
    fn test_export_replaces_stale_output() {
        let staging = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let entries = vec![staged_entry(staging.path(), "A")];
        let partitioner = TaskPartitioner::new(devices(1), out.path());
        let batches = partitioner.partition(&entries).unwrap();

        let stale = out.path().join("Output_Batch_Phone_1/A/leftover.txt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();

        partitioner.export(&batches).unwrap();
        assert!(!stale.exists());
        assert!(out.path().join("Output_Batch_Phone_1/A/text/title.txt").is_file());
    }
}
