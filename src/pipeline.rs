//! Pipeline Orchestrator - Single Entry Point
//!
//! Idle -> Scanning -> Processing(style)* -> Partitioning -> Exporting -> Done
//!
//! A style that fails is recorded as `"<code>: <reason>"` and the run moves
//! on. Scan, partition and export failures end the run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{ConfigError, KitchenConfig};
use crate::copywriting::CopyGenerator;
use crate::llm::{LanguageModel, LlmError, OllamaClient};
use crate::manifest::ManifestEntry;
use crate::partition::{PartitionError, TaskPartitioner};
use crate::report::ReportError;
use crate::scanner::{InputScanner, ScanError};
use crate::style::StyleProcessor;
use crate::templates::{TemplateError, TemplateRepository};
use crate::watermark::WatermarkProcessor;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Template store error: {0}")]
    Template(#[from] TemplateError),

    #[error("Language model client error: {0}")]
    Llm(#[from] LlmError),

    #[error("Partition failed: {0}")]
    Partition(#[from] PartitionError),

    #[error("Report failed: {0}")]
    Report(#[from] ReportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Scanning,
    Processing { style_code: String },
    Partitioning,
    Exporting,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Processing { style_code } => write!(f, "processing({})", style_code),
            Self::Partitioning => write!(f, "partitioning"),
            Self::Exporting => write!(f, "exporting"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Entries carry their assigned device and stay in scan order.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub entries: Vec<ManifestEntry>,
    pub failures: Vec<String>,
}

pub struct CentralPipeline {
    config: Arc<KitchenConfig>,
    scanner: InputScanner,
    processor: StyleProcessor,
    partitioner: TaskPartitioner,
    stage: PipelineStage,
}

impl CentralPipeline {
    /// Talks to the configured Ollama endpoint.
    pub fn new(config: KitchenConfig) -> Result<Self, PipelineError> {
        let client = OllamaClient::new(config.llm_base_url.clone())?;
        Self::with_model(config, Box::new(client))
    }

    pub fn with_model(config: KitchenConfig, model: Box<dyn LanguageModel>) -> Result<Self, PipelineError> {
        config.validate()?;
        let config = Arc::new(config);

        let mut templates = TemplateRepository::bundled()?;
        if let Some(dir) = &config.templates_dir {
            templates.load_from_dir(dir)?;
        }
        debug!(categories = ?templates.categories(), "Templates ready");

        let generator = CopyGenerator::new(
            templates,
            model,
            config.sensitive_dictionary.clone(),
        )
        .with_canned_response(config.canned_response.clone());
        let watermark = WatermarkProcessor::new(config.watermark.clone());
        if watermark.uses_builtin_glyphs() {
            warn!("No TrueType font found, watermark text uses built-in glyphs");
        }

        Ok(Self {
            scanner: InputScanner::new(&config.input_root),
            processor: StyleProcessor::new(Arc::clone(&config), generator, watermark),
            partitioner: TaskPartitioner::from_config(&config),
            config,
            stage: PipelineStage::Idle,
        })
    }

    pub fn stage(&self) -> &PipelineStage {
        &self.stage
    }

    pub fn run(&mut self) -> Result<PipelineResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        let _guard = span.enter();

        info!(
            engine = ENGINE_VERSION,
            input = %self.config.input_root.display(),
            output = %self.config.output_root.display(),
            devices = self.config.device_assignment.device_ids.len(),
            "Pipeline started"
        );
        self.config.ensure_paths()?;

        self.stage = PipelineStage::Scanning;
        let mut entries = vec![];
        let mut failures = vec![];
        for raw in self.scanner.scan()? {
            let raw = raw?;
            let style_code = raw.style_code.clone();
            self.stage = PipelineStage::Processing { style_code: style_code.clone() };
            match self.processor.process(raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(style = %style_code, error = %e, "Style failed");
                    failures.push(format!("{}: {}", style_code, e));
                }
            }
        }

        self.stage = PipelineStage::Partitioning;
        let batches = self.partitioner.partition(&entries)?;

        self.stage = PipelineStage::Exporting;
        self.partitioner.export(&batches)?;

        let order: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.style_code.as_str(), i))
            .collect();
        let mut assigned: Vec<ManifestEntry> =
            batches.into_iter().flat_map(|batch| batch.entries).collect();
        assigned.sort_by_key(|e| order.get(e.style_code.as_str()).copied().unwrap_or(usize::MAX));

        self.stage = PipelineStage::Done;
        info!(processed = assigned.len(), failures = failures.len(), "Pipeline finished");
        Ok(PipelineResult { run_id, entries: assigned, failures })
    }
}
