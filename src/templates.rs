//! Template Repository - Category Copy Skeletons
//!
//! Each category maps to a title/body pair with `{name}` placeholders.
//! The bundled store is compiled in; operators may register more from disk.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const BUNDLED: [(&str, &str); 2] = [
    ("tee", include_str!("../templates_store/tee.yaml")),
    ("hoodie", include_str!("../templates_store/hoodie.yaml")),
];

const DEFAULT_TITLE: &str = "精选好物";
const DEFAULT_BODY: &str = "默认文案模板，后续补充详细描述。";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template {category}: {message}")]
    Invalid { category: String, message: String },

    #[error("Missing placeholder '{0}' in context")]
    MissingPlaceholder(String),

    #[error("Malformed template at byte {0}")]
    Malformed(usize),

    #[error("Cannot read templates from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDefinition {
    pub title: String,
    pub body: String,
}

#[derive(Deserialize)]
struct TemplateFile {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

impl TemplateDefinition {
    pub fn from_yaml(category: &str, content: &str) -> Result<Self, TemplateError> {
        let file: TemplateFile = if content.trim().is_empty() {
            TemplateFile { title: None, body: None }
        } else {
            serde_yaml::from_str(content).map_err(|e| TemplateError::Invalid {
                category: category.to_string(),
                message: e.to_string(),
            })?
        };
        Ok(Self {
            title: file.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: file.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
        })
    }
}

pub struct TemplateRepository {
    templates: HashMap<String, TemplateDefinition>,
}

impl TemplateRepository {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    /// Repository holding the compiled-in categories.
    pub fn bundled() -> Result<Self, TemplateError> {
        let mut repo = Self::new();
        for (category, content) in BUNDLED {
            repo.register(category, TemplateDefinition::from_yaml(category, content)?);
        }
        Ok(repo)
    }

    /// Register every `<category>.yaml` in `dir`, replacing bundled entries
    /// of the same name. Unparseable files are skipped with a warning.
    pub fn load_from_dir(&mut self, dir: &Path) -> Result<usize, TemplateError> {
        let io_err = |source| TemplateError::Io { path: dir.to_path_buf(), source };
        let mut loaded = 0;
        if !dir.exists() {
            warn!(dir = %dir.display(), "Template directory missing, using bundled templates");
            return Ok(loaded);
        }
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_yaml = path.extension().map_or(false, |e| e == "yaml" || e == "yml");
            let category = match path.file_stem() {
                Some(stem) if is_yaml => stem.to_string_lossy().into_owned(),
                _ => continue,
            };
            let content = fs::read_to_string(&path)
                .map_err(|source| TemplateError::Io { path: path.clone(), source })?;
            match TemplateDefinition::from_yaml(&category, &content) {
                Ok(definition) => {
                    self.register(&category, definition);
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping template"),
            }
        }
        info!(dir = %dir.display(), loaded, "Loaded templates from directory");
        Ok(loaded)
    }

    pub fn get(&self, category: &str) -> Result<&TemplateDefinition, TemplateError> {
        self.templates
            .get(category)
            .ok_or_else(|| TemplateError::NotFound(category.to_string()))
    }

    pub fn categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn register(&mut self, category: &str, definition: TemplateDefinition) {
        self.templates.insert(category.to_string(), definition);
    }
}

impl Default for TemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `{name}` placeholders from `context`. `{{` and `}}` are
/// literal braces. Every placeholder must be present.
pub fn render(template: &str, context: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(TemplateError::Malformed(pos));
                }
                let value = context
                    .get(name.trim())
                    .ok_or_else(|| TemplateError::MissingPlaceholder(name.clone()))?;
                out.push_str(value);
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(TemplateError::Malformed(pos)),
            _ => out.push(c),
        }
    }

    Ok(out)
}
