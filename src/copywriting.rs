//! Copy Generator - Templates, Model Calls, Scrubbing
//!
//! Never returns an empty body: a failed or sentinel model response is
//! replaced by a description assembled from the context.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::{GenerationTemplate, SensitiveDictionary};
use crate::llm::LanguageModel;
use crate::sensitive::{FilterOutcome, SensitiveFilter};
use crate::templates::{render, TemplateError, TemplateRepository};

/// Placeholder name to value, sorted for stable manifests.
pub type GenerationContext = BTreeMap<String, String>;

/// Responses the backend uses to signal it produced nothing useful.
const SENTINEL_RESPONSES: [&str; 2] = ["兜底响应", "FALLBACK"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopywritingResult {
    pub title: String,
    pub bodies: Vec<String>,
    /// Deduplicated and sorted.
    pub sensitive_hits: Vec<String>,
}

pub struct CopyGenerator {
    templates: TemplateRepository,
    model: Box<dyn LanguageModel>,
    filter: SensitiveFilter,
    canned_response: Option<String>,
}

impl CopyGenerator {
    pub fn new(
        templates: TemplateRepository,
        model: Box<dyn LanguageModel>,
        dictionary: SensitiveDictionary,
    ) -> Self {
        Self {
            templates,
            model,
            filter: SensitiveFilter::new(dictionary),
            canned_response: None,
        }
    }

    /// Render `canned` with the context (plus `{variation}`) instead of
    /// calling the model.
    pub fn with_canned_response(mut self, canned: Option<String>) -> Self {
        self.canned_response = canned;
        self
    }

    pub fn generate(
        &self,
        template_config: &GenerationTemplate,
        model: &str,
        context: &GenerationContext,
    ) -> Result<CopywritingResult, TemplateError> {
        let template = self.templates.get(&template_config.category)?;
        let title = render(&template.title, context)?;
        let body_seed = render(&template.body, context)?;
        let prompt = build_prompt(&title, &body_seed, context);
        let replace = template_config.allow_sensitive_replacement;

        let mut bodies = vec![];
        let mut hits = BTreeSet::new();
        for variation in 0..template_config.variations.max(1) {
            let response = self.call_model(model, &prompt, context, variation)?;
            let filtered = self.scrub(&response, replace);
            hits.extend(filtered.hits);
            bodies.push(filtered.text);
        }

        let filtered_title = self.scrub(&title, replace);
        hits.extend(filtered_title.hits);

        Ok(CopywritingResult {
            title: filtered_title.text,
            bodies,
            sensitive_hits: hits.into_iter().collect(),
        })
    }

    fn scrub(&self, text: &str, replace: bool) -> FilterOutcome {
        if replace {
            self.filter.apply(text)
        } else {
            FilterOutcome { text: text.to_string(), hits: self.filter.scan(text) }
        }
    }

    fn call_model(
        &self,
        model: &str,
        prompt: &str,
        context: &GenerationContext,
        variation: u32,
    ) -> Result<String, TemplateError> {
        if let Some(canned) = &self.canned_response {
            let mut canned_context = context.clone();
            canned_context.insert("variation".to_string(), variation.to_string());
            return render(canned, &canned_context);
        }

        let response = match self.model.generate(model, prompt) {
            Ok(response) => response,
            Err(e) => {
                warn!(variation, error = %e, "Model unavailable, using fallback copy");
                return Ok(fallback_body(context));
            }
        };

        let trimmed = response.trim();
        if trimmed.is_empty() || SENTINEL_RESPONSES.contains(&trimmed) {
            debug!(variation, "Empty or sentinel response, using fallback copy");
            return Ok(fallback_body(context));
        }
        Ok(response)
    }
}

fn build_prompt(title: &str, body: &str, context: &GenerationContext) -> String {
    let material = context
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "你是闲鱼服饰文案助手，请根据提供的素材生成 150-300 字的商品描述，\
         要求自然、真实、有代入感，避免使用平台敏感词。\n\
         推荐标题：{}\n描述模板：{}\n原始素材：{}\n",
        title, body, material
    )
}

/// Deterministic copy built only from context fields.
pub fn fallback_body(context: &GenerationContext) -> String {
    let field = |key: &str, default: &'static str| -> String {
        context.get(key).cloned().unwrap_or_else(|| default.to_string())
    };
    format!(
        "{} 上新，采用 {}，版型 {}。尺码覆盖：{}；颜色选择：{}。\
         细节做工扎实，日常通勤或休闲都适合，欢迎私信咨询尺码与细节。",
        field("style_code", "本款"),
        field("fabric", "高品质面料"),
        field("fit", "宽松舒适"),
        field("sizes", "S-XL"),
        field("colors", "基础百搭配色"),
    )
}
