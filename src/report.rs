//! Report Builder - Delivery Report Aggregation
//!
//! `total` counts every style the run attempted, so
//! `success == total - failures.len()` always holds.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::hashing::compute_manifest_hash;
use crate::manifest::{write_json, EntryRecord, ManifestEntry, ManifestError, StyleManifest};
use crate::pipeline::PipelineResult;

pub const REPORT_FILE: &str = "delivery_report.json";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed report {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid report {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("Report hashing failed: {0}")]
    Hash(#[source] serde_json::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Aggregates over one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    pub total: usize,
    pub failures: Vec<String>,
    pub per_device: BTreeMap<String, usize>,
    pub sensitive_hits: BTreeMap<String, BTreeSet<String>>,
}

impl DeliveryStats {
    pub fn collect(entries: &[ManifestEntry], failures: &[String]) -> Self {
        let mut per_device = BTreeMap::new();
        let mut sensitive_hits: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in entries {
            if !entry.device_id.is_empty() {
                *per_device.entry(entry.device_id.clone()).or_insert(0) += 1;
            }
            for word in StyleManifest::recorded_hits(&entry.output_dir) {
                sensitive_hits.entry(word).or_default().insert(entry.style_code.clone());
            }
        }
        Self {
            total: entries.len() + failures.len(),
            failures: failures.to_vec(),
            per_device,
            sensitive_hits,
        }
    }

    pub fn success(&self) -> usize {
        self.total.saturating_sub(self.failures.len())
    }
}

/// The `summary` block. Every field defaults so older or partial reports
/// still summarise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSummary {
    pub total: usize,
    pub success: usize,
    pub failures: Vec<String>,
    pub per_device: BTreeMap<String, usize>,
    pub sensitive_hits: BTreeMap<String, Vec<String>>,
}

impl From<&DeliveryStats> for ReportSummary {
    fn from(stats: &DeliveryStats) -> Self {
        Self {
            total: stats.total,
            success: stats.success(),
            failures: stats.failures.clone(),
            per_device: stats.per_device.clone(),
            sensitive_hits: stats
                .sensitive_hits
                .iter()
                .map(|(word, styles)| (word.clone(), styles.iter().cloned().collect()))
                .collect(),
        }
    }
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Total: {}, Success: {}, Failures: {}", self.total, self.success, self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  ! {}", failure)?;
        }
        for (device, count) in &self.per_device {
            write!(f, "\n  {}: {}", device, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub summary: ReportSummary,
    pub entries: Vec<EntryRecord>,
    pub run_id: String,
    pub generated_at: String,
    #[serde(default)]
    pub manifest_hash: String,
}

#[derive(Debug, Default)]
pub struct ReportBuilder;

impl ReportBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, result: &PipelineResult) -> Result<DeliveryReport, ReportError> {
        let stats = DeliveryStats::collect(&result.entries, &result.failures);
        let entries = result
            .entries
            .iter()
            .map(|entry| EntryRecord::from_entry(entry).with_device(&entry.device_id))
            .collect();

        let mut report = DeliveryReport {
            summary: ReportSummary::from(&stats),
            entries,
            run_id: result.run_id.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            manifest_hash: String::new(),
        };
        report.manifest_hash = compute_manifest_hash(&report).map_err(ReportError::Hash)?;
        Ok(report)
    }

    pub fn write(&self, result: &PipelineResult, output_dir: &Path) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(output_dir).map_err(|source| ReportError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let report = self.build(result)?;
        let path = output_dir.join(REPORT_FILE);
        write_json(&path, &report)?;
        info!(
            path = %path.display(),
            total = report.summary.total,
            success = report.summary.success,
            failures = report.summary.failures.len(),
            "Delivery report written"
        );
        Ok(path)
    }
}

/// Reads a report, failing unless it has `summary` and a list of `entries`.
pub fn load_report(path: &Path) -> Result<Value, ReportError> {
    let content = fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let data: Value = serde_json::from_str(&content).map_err(|source| ReportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |message: &str| ReportError::Invalid {
        path: path.to_path_buf(),
        message: message.to_string(),
    };
    if data.get("summary").is_none() || data.get("entries").is_none() {
        return Err(invalid("missing summary or entries"));
    }
    if !data["entries"].is_array() {
        return Err(invalid("entries must be a list"));
    }
    Ok(data)
}

/// Absent, malformed or incomplete reports read as `None`.
pub fn load_report_lenient(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    match load_report(path) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable report");
            None
        }
    }
}

/// Summary block of a loaded report; missing fields read as empty.
pub fn summary_of(report: &Value) -> ReportSummary {
    report
        .get("summary")
        .cloned()
        .and_then(|summary| serde_json::from_value(summary).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportDiff {
    pub new_styles: BTreeSet<String>,
    pub missing_styles: BTreeSet<String>,
    pub failed_styles: BTreeSet<String>,
}

fn style_codes(report: &Value) -> BTreeSet<String> {
    report
        .get("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("style_code"))
                .map(|code| match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Styles added, dropped, or failing relative to `previous`. Failed codes
/// are the text before the first `:` of each failure message.
pub fn diff_reports(current: &Value, previous: Option<&Value>) -> ReportDiff {
    let now = style_codes(current);
    let before = previous.map(style_codes).unwrap_or_default();

    let failed_styles = current
        .get("summary")
        .and_then(|s| s.get("failures"))
        .and_then(Value::as_array)
        .map(|failures| {
            failures
                .iter()
                .filter_map(Value::as_str)
                .map(|msg| msg.split(':').next().unwrap_or(msg).trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    ReportDiff {
        new_styles: now.difference(&before).cloned().collect(),
        missing_styles: before.difference(&now).cloned().collect(),
        failed_styles,
    }
}
