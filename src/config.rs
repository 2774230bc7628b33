//! Configuration Model - Frozen Records
//!
//! Built once at pipeline construction and shared read-only by every style
//! in a run. Settings files only fill in what the command line leaves open.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "qwen:4b";
pub const DEFAULT_LLM_BASE_URL: &str = "http://127.0.0.1:11434";
pub const ENV_LLM_BASE_URL: &str = "OLLAMA_BASE_URL";
pub const ENV_CANNED_RESPONSE: &str = "OLLAMA_FAKE_RESPONSE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {field} range: ({low}, {high})")]
    InvalidRange { field: &'static str, low: i64, high: i64 },

    #[error("Device weights must sum to a positive value, got {0}")]
    InvalidWeights(i64),

    #[error("No devices configured")]
    NoDevices,

    #[error("Expected exactly {expected} devices, got {actual}")]
    DeviceCount { expected: usize, actual: usize },

    #[error("Tail candidate {0} is not a two-digit suffix")]
    InvalidTail(u32),

    #[error("Base price must not be negative, got {0}")]
    NegativePrice(f64),

    #[error("Path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn default_true() -> bool { true }

fn default_tail_candidates() -> Vec<u32> { (0..100).collect() }

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Sale price policy. The base price keeps its whole part and may get a
/// decorative two-digit tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceConfig {
    pub base_yuan: f64,
    #[serde(default = "default_true")]
    pub keep_decimal: bool,
    #[serde(default = "default_true")]
    pub random_tail: bool,
    #[serde(default = "default_tail_candidates")]
    pub tail_candidates: Vec<u32>,
}

impl PriceConfig {
    pub fn new(base_yuan: f64) -> Self {
        Self {
            base_yuan,
            keep_decimal: true,
            random_tail: true,
            tail_candidates: default_tail_candidates(),
        }
    }

    pub fn fixed(base_yuan: f64) -> Self {
        Self { random_tail: false, ..Self::new(base_yuan) }
    }

    /// Derive the sale price.
    ///
    /// With a seed the tail index is `seed % len`, except that a positive
    /// seed landing on index 0 wraps to the last candidate when there is
    /// more than one. Without a seed the tail is drawn uniformly.
    pub fn derive_price(&self, seed: Option<u64>) -> f64 {
        if !self.keep_decimal {
            return self.base_yuan.round();
        }
        if !self.random_tail || self.tail_candidates.is_empty() {
            return round_cents(self.base_yuan);
        }

        let tail = match seed {
            Some(seed) => {
                let len = self.tail_candidates.len();
                let mut index = (seed % len as u64) as usize;
                if len > 1 && seed > 0 && index == 0 {
                    index = len - 1;
                }
                self.tail_candidates[index]
            }
            None => match self.tail_candidates.choose(&mut rand::thread_rng()) {
                Some(tail) => *tail,
                None => return round_cents(self.base_yuan),
            },
        };

        round_cents(self.base_yuan.trunc() + f64::from(tail) / 100.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_yuan < 0.0 {
            return Err(ConfigError::NegativePrice(self.base_yuan));
        }
        match self.tail_candidates.iter().find(|t| **t > 99) {
            Some(bad) => Err(ConfigError::InvalidTail(*bad)),
            None => Ok(()),
        }
    }
}

/// Timing ranges consumed by the device automation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub micro_delay_ms: (i64, i64),
    pub macro_delay_min: (i64, i64),
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            micro_delay_ms: (1500, 4000),
            macro_delay_min: (10, 45),
        }
    }
}

impl DelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("micro_delay_ms", self.micro_delay_ms)?;
        check_range("macro_delay_min", self.macro_delay_min)
    }
}

fn check_range(field: &'static str, (low, high): (i64, i64)) -> Result<(), ConfigError> {
    if low < 0 || high < low {
        return Err(ConfigError::InvalidRange { field, low, high });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub device_ids: Vec<String>,
    #[serde(default)]
    pub weights: Option<BTreeMap<String, i64>>,
}

impl DeviceAssignment {
    pub fn new(device_ids: Vec<String>) -> Self {
        Self { device_ids, weights: None }
    }

    /// Split a comma separated device list, dropping blanks.
    pub fn parse_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Weights normalised to sum to 1. Not consulted by the partitioner,
    /// which assigns round-robin.
    pub fn normalized_weights(&self) -> Result<BTreeMap<String, f64>, ConfigError> {
        match &self.weights {
            Some(weights) if !weights.is_empty() => {
                let total: i64 = weights.values().sum();
                if total <= 0 {
                    return Err(ConfigError::InvalidWeights(total));
                }
                Ok(weights
                    .iter()
                    .map(|(device, weight)| (device.clone(), *weight as f64 / total as f64))
                    .collect())
            }
            _ => {
                let uniform = 1.0 / self.device_ids.len().max(1) as f64;
                Ok(self.device_ids.iter().map(|d| (d.clone(), uniform)).collect())
            }
        }
    }

    pub fn require_count(&self, expected: usize) -> Result<(), ConfigError> {
        if self.device_ids.len() != expected {
            return Err(ConfigError::DeviceCount { expected, actual: self.device_ids.len() });
        }
        Ok(())
    }
}

fn default_variations() -> u32 { 3 }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationTemplate {
    pub category: String,
    #[serde(default = "default_variations")]
    pub variations: u32,
    /// When false, sensitive words are still reported but left in the text.
    #[serde(default = "default_true")]
    pub allow_sensitive_replacement: bool,
}

impl GenerationTemplate {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            variations: default_variations(),
            allow_sensitive_replacement: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitiveDictionary {
    pub sensitive_words: Vec<String>,
    /// Alias to replacement, applied in declaration order.
    #[serde(with = "alias_pairs")]
    pub brand_alias_mapping: Vec<(String, String)>,
}

mod alias_pairs {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        pairs: &[(String, String)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (alias, replacement) in pairs {
            map.serialize_entry(alias, replacement)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, String)>, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of brand alias to replacement")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((alias, replacement)) = access.next_entry::<String, String>()? {
                    pairs.push((alias, replacement));
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub text: String,
    pub font_size: u32,
    pub opacity: f32,
    pub spacing: u32,
    pub color: [u8; 3],
    /// Counter-clockwise, in degrees.
    pub angle: f32,
    pub font_path: Option<PathBuf>,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            text: "电子衣柜".to_string(),
            font_size: 48,
            opacity: 0.18,
            spacing: 220,
            color: [255, 255, 255],
            angle: 30.0,
            font_path: None,
        }
    }
}

/// Fixed copy facts merged into every style's generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextDefaults {
    pub fabric: String,
    pub fit: String,
    pub highlights: String,
    pub year: String,
    pub colors: String,
    pub sizes: String,
}

impl Default for ContextDefaults {
    fn default() -> Self {
        Self {
            fabric: "320g 重磅面料".to_string(),
            fit: "男女同款宽松版".to_string(),
            highlights: "雪花图案、做旧洗水、细节满满".to_string(),
            year: "2025".to_string(),
            colors: "黑色 白色".to_string(),
            sizes: "S M L XL XXL".to_string(),
        }
    }
}

/// Optional YAML settings file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KitchenSettings {
    pub sensitive_dictionary: Option<SensitiveDictionary>,
    pub watermark: Option<WatermarkConfig>,
    pub delays: Option<DelayConfig>,
    pub device_weights: Option<BTreeMap<String, i64>>,
    pub tail_candidates: Option<Vec<u32>>,
    pub variations: Option<u32>,
    pub model: Option<String>,
    pub llm_base_url: Option<String>,
    pub context_defaults: Option<ContextDefaults>,
    pub templates_dir: Option<PathBuf>,
}

impl KitchenSettings {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings = serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }
}

/// The aggregate configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct KitchenConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub price: PriceConfig,
    pub delays: DelayConfig,
    pub device_assignment: DeviceAssignment,
    pub template: GenerationTemplate,
    pub sensitive_dictionary: SensitiveDictionary,
    pub watermark: WatermarkConfig,
    pub context_defaults: ContextDefaults,
    pub model: String,
    pub llm_base_url: String,
    /// Replaces the model call with this template when set.
    pub canned_response: Option<String>,
    /// Extra `<category>.yaml` templates layered over the bundled ones.
    pub templates_dir: Option<PathBuf>,
}

impl KitchenConfig {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        price: PriceConfig,
        device_ids: Vec<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            price,
            delays: DelayConfig::default(),
            device_assignment: DeviceAssignment::new(device_ids),
            template: GenerationTemplate::new(category),
            sensitive_dictionary: SensitiveDictionary::default(),
            watermark: WatermarkConfig::default(),
            context_defaults: ContextDefaults::default(),
            model: DEFAULT_MODEL.to_string(),
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            canned_response: None,
            templates_dir: None,
        }
    }

    pub fn with_settings(mut self, settings: KitchenSettings) -> Self {
        if let Some(dictionary) = settings.sensitive_dictionary {
            self.sensitive_dictionary = dictionary;
        }
        if let Some(watermark) = settings.watermark {
            self.watermark = watermark;
        }
        if let Some(delays) = settings.delays {
            self.delays = delays;
        }
        if let Some(weights) = settings.device_weights {
            self.device_assignment.weights = Some(weights);
        }
        if let Some(tails) = settings.tail_candidates {
            self.price.tail_candidates = tails;
        }
        if let Some(variations) = settings.variations {
            self.template.variations = variations;
        }
        if let Some(model) = settings.model {
            self.model = model;
        }
        if let Some(url) = settings.llm_base_url {
            self.llm_base_url = url;
        }
        if let Some(defaults) = settings.context_defaults {
            self.context_defaults = defaults;
        }
        if let Some(dir) = settings.templates_dir {
            self.templates_dir = Some(dir);
        }
        self
    }

    /// Pick up the LLM endpoint and canned-response overrides.
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_LLM_BASE_URL) {
            if !url.trim().is_empty() {
                self.llm_base_url = url;
            }
        }
        if let Ok(canned) = std::env::var(ENV_CANNED_RESPONSE) {
            if !canned.is_empty() {
                debug!("Canned model response enabled");
                self.canned_response = Some(canned);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_assignment.device_ids.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        self.device_assignment.normalized_weights()?;
        self.delays.validate()?;
        self.price.validate()
    }

    /// The input root must exist; the output root is created on demand.
    pub fn ensure_paths(&self) -> Result<(), ConfigError> {
        if !self.input_root.is_dir() {
            return Err(ConfigError::MissingPath(self.input_root.clone()));
        }
        fs::create_dir_all(&self.output_root).map_err(|source| ConfigError::Io {
            path: self.output_root.clone(),
            source,
        })
    }
}

/// Operator-authored per-style overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleMeta {
    pub style_code: String,
    pub price_override: Option<f64>,
    pub colors: Vec<String>,
    pub sizes: Vec<String>,
    pub stock_per_variant: Option<u32>,
    pub macro_delay_override: Option<(i64, i64)>,
}

impl StyleMeta {
    pub fn new(style_code: impl Into<String>) -> Self {
        Self { style_code: style_code.into(), ..Self::default() }
    }
}
