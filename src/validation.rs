//! Validation System - Rules Over Persisted Manifests
//!
//! Rules inspect parsed JSON and produce structured violations. Unparseable
//! files are violations too, never skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::hashing::{verify_manifest_hash, HASH_FIELD};
use crate::partition::{BATCH_DIR_PREFIX, BATCH_MANIFEST_FILE};
use crate::report::REPORT_FILE;

const ENTRY_KEYS: [&str; 4] = ["style_code", "paths", "media", "pricing"];
const PATH_KEYS: [&str; 3] = ["root", "title", "descriptions"];
const MEDIA_KEYS: [&str; 2] = ["primary", "variants"];
const PRICING_KEYS: [&str; 2] = ["price", "macro_delay"];
const DELAY_KEYS: [&str; 2] = ["min", "max"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub path: PathBuf,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    fn error(rule: &str, path: &Path, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: ViolationSeverity::Error,
            path: path.to_path_buf(),
            message: message.into(),
            expected: None,
            actual: None,
            remediation: vec![],
        }
    }

    fn expecting(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    fn remedy(mut self, step: &str) -> Self {
        self.remediation.push(step.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub checked: Vec<PathBuf>,
    pub violations: Vec<ValidationViolation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    BatchManifest,
    DeliveryReport,
}

/// A parsed file handed to the rules.
pub struct Document<'a> {
    pub kind: DocumentKind,
    pub path: &'a Path,
    pub value: &'a Value,
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, doc: &Document<'_>) -> Vec<ValidationViolation>;
}

fn missing_keys(node: &Value, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|key| node.get(**key).is_none())
        .map(|key| key.to_string())
        .collect()
}

// --- Concrete Rules ---

/// Entry structure shared by batch manifests and the report.
pub struct EntryShapeRule;

impl EntryShapeRule {
    fn check_block(
        &self,
        doc: &Document<'_>,
        node: Option<&Value>,
        context: &str,
        required: &[&str],
        out: &mut Vec<ValidationViolation>,
    ) {
        match node {
            Some(block) if block.is_object() => {
                let missing = missing_keys(block, required);
                if !missing.is_empty() {
                    out.push(
                        ValidationViolation::error(self.name(), doc.path, format!("{} missing keys", context))
                            .expecting(required.join(", "), format!("missing {}", missing.join(", "))),
                    );
                }
            }
            // Absent blocks are already reported as missing entry keys.
            None => {}
            Some(_) => out.push(ValidationViolation::error(
                self.name(),
                doc.path,
                format!("{} must be object", context),
            )),
        }
    }
}

impl ValidationRule for EntryShapeRule {
    fn name(&self) -> &'static str {
        "entry_shape"
    }

    fn validate(&self, doc: &Document<'_>) -> Vec<ValidationViolation> {
        let Some(entries) = doc.value.get("entries").and_then(Value::as_array) else {
            return vec![];
        };
        let mut out = vec![];
        for (i, entry) in entries.iter().enumerate() {
            let context = format!("entries[{}]", i);
            if !entry.is_object() {
                out.push(ValidationViolation::error(self.name(), doc.path, format!("{} must be object", context)));
                continue;
            }
            let missing = missing_keys(entry, &ENTRY_KEYS);
            if !missing.is_empty() {
                out.push(
                    ValidationViolation::error(self.name(), doc.path, format!("{} missing keys", context))
                        .expecting(ENTRY_KEYS.join(", "), format!("missing {}", missing.join(", "))),
                );
            }
            self.check_block(doc, entry.get("paths"), &format!("{}.paths", context), &PATH_KEYS, &mut out);
            self.check_block(doc, entry.get("media"), &format!("{}.media", context), &MEDIA_KEYS, &mut out);
            let pricing = entry.get("pricing");
            self.check_block(doc, pricing, &format!("{}.pricing", context), &PRICING_KEYS, &mut out);
            if let Some(pricing) = pricing.filter(|p| p.is_object()) {
                self.check_block(
                    doc,
                    pricing.get("macro_delay"),
                    &format!("{}.pricing.macro_delay", context),
                    &DELAY_KEYS,
                    &mut out,
                );
            }
        }
        out
    }
}

pub struct BatchShapeRule;

impl ValidationRule for BatchShapeRule {
    fn name(&self) -> &'static str {
        "batch_shape"
    }

    fn validate(&self, doc: &Document<'_>) -> Vec<ValidationViolation> {
        if doc.kind != DocumentKind::BatchManifest {
            return vec![];
        }
        let Some(entries) = doc.value.get("entries").and_then(Value::as_array) else {
            return vec![ValidationViolation::error(self.name(), doc.path, "expected object with 'entries' list")
                .remedy("Re-run the pipeline to regenerate the batch")];
        };
        match doc.value.get("count").and_then(Value::as_u64) {
            Some(count) if count as usize == entries.len() => vec![],
            Some(count) => vec![ValidationViolation::error(self.name(), doc.path, "count does not match entries")
                .expecting(entries.len().to_string(), count.to_string())],
            None => vec![],
        }
    }
}

pub struct ReportShapeRule;

impl ValidationRule for ReportShapeRule {
    fn name(&self) -> &'static str {
        "report_shape"
    }

    fn validate(&self, doc: &Document<'_>) -> Vec<ValidationViolation> {
        if doc.kind != DocumentKind::DeliveryReport {
            return vec![];
        }
        let missing = missing_keys(doc.value, &["summary", "entries"]);
        if !missing.is_empty() {
            return vec![ValidationViolation::error(self.name(), doc.path, "must contain summary + entries")
                .expecting("summary, entries", format!("missing {}", missing.join(", ")))];
        }
        if !doc.value["entries"].is_array() {
            return vec![ValidationViolation::error(self.name(), doc.path, "entries must be a list")];
        }
        vec![]
    }
}

/// A recorded `manifest_hash` must match the content.
pub struct ManifestHashRule;

impl ValidationRule for ManifestHashRule {
    fn name(&self) -> &'static str {
        "manifest_hash"
    }

    fn validate(&self, doc: &Document<'_>) -> Vec<ValidationViolation> {
        match verify_manifest_hash(doc.value) {
            Some(true) => vec![],
            Some(false) => vec![ValidationViolation::error(self.name(), doc.path, "content does not match manifest_hash")
                .remedy("Do not edit exported manifests by hand; re-export instead")],
            None => vec![ValidationViolation {
                severity: ViolationSeverity::Warning,
                ..ValidationViolation::error(self.name(), doc.path, format!("no {} recorded", HASH_FIELD))
            }],
        }
    }
}

/// Validator runs every rule against every document
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(BatchShapeRule),
                Box::new(ReportShapeRule),
                Box::new(EntryShapeRule),
                Box::new(ManifestHashRule),
            ],
        }
    }

    pub fn validate_document(&self, doc: &Document<'_>) -> Vec<ValidationViolation> {
        self.rules.iter().flat_map(|rule| rule.validate(doc)).collect()
    }

    /// Check every `Output_Batch_Phone_*/batch_manifest.json` under `root`
    /// and, if present, `<root>/<report_dir>/delivery_report.json`.
    pub fn validate_output(&self, root: &Path, report_dir: &str) -> std::io::Result<ValidationResult> {
        let mut files = vec![];
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let is_batch = entry.file_name().to_string_lossy().starts_with(BATCH_DIR_PREFIX);
            let manifest = entry.path().join(BATCH_MANIFEST_FILE);
            if is_batch && manifest.is_file() {
                files.push((DocumentKind::BatchManifest, manifest));
            }
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        let report = root.join(report_dir).join(REPORT_FILE);
        if report.is_file() {
            files.push((DocumentKind::DeliveryReport, report));
        }

        let mut violations = vec![];
        let mut checked = vec![];
        for (kind, path) in files {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&content) {
                Ok(value) => {
                    let doc = Document { kind, path: &path, value: &value };
                    violations.extend(self.validate_document(&doc));
                }
                Err(e) => violations.push(
                    ValidationViolation::error("json_parse", &path, "malformed JSON").expecting("valid JSON", e.to_string()),
                ),
            }
            debug!(path = %path.display(), "Validated");
            checked.push(path);
        }

        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        Ok(ValidationResult { valid, checked, violations })
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
