//! Central Kitchen - listing batch generator
//!
//! Turns raw per-style asset folders into listing batches spread across a
//! fixed set of devices:
//!
//! 1. Scan the input root for style folders
//! 2. Generate copy through the language model, scrubbing sensitive words
//! 3. Watermark every image and resolve price, stock and delay
//! 4. Partition styles across devices and export one batch per device
//! 5. Roll everything up into a delivery report
//!
//! A failing style never aborts a run; it is reported by code and reason.

pub mod batch_copy;
pub mod config;
pub mod copywriting;
pub mod hashing;
pub mod llm;
pub mod manifest;
pub mod media;
pub mod partition;
pub mod pipeline;
pub mod report;
pub mod scanner;
pub mod sensitive;
pub mod style;
pub mod templates;
pub mod validation;
pub mod watermark;

pub use batch_copy::{copy_batches, CopyError, CopyReport};
pub use config::{
    ConfigError, ContextDefaults, DelayConfig, DeviceAssignment, GenerationTemplate, KitchenConfig,
    KitchenSettings, PriceConfig, SensitiveDictionary, StyleMeta, WatermarkConfig,
};
pub use copywriting::{CopyGenerator, CopywritingResult};
pub use hashing::{canonical_json, compute_manifest_hash, sha256_hex};
pub use llm::{LanguageModel, LlmError, OllamaClient};
pub use manifest::{EntryRecord, ManifestEntry, ManifestError, StyleManifest};
pub use partition::{BatchManifest, PartitionError, TaskBatch, TaskPartitioner};
pub use pipeline::{CentralPipeline, PipelineError, PipelineResult, PipelineStage};
pub use report::{DeliveryReport, DeliveryStats, ReportBuilder, ReportDiff, ReportError, ReportSummary};
pub use scanner::{InputScanner, RawStyle, ScanError};
pub use sensitive::{FilterOutcome, SensitiveFilter};
pub use style::{StyleError, StyleProcessor};
pub use templates::{TemplateDefinition, TemplateError, TemplateRepository};
pub use validation::{
    ValidationResult, ValidationRule, ValidationViolation, Validator, ViolationSeverity,
};
pub use watermark::{WatermarkError, WatermarkProcessor};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
