//! Language Model Client
//!
//! Blocking `POST {base_url}/api/generate` with a bounded timeout and a
//! fixed retry count.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model {model} failed after {attempts} attempts")]
    RetriesExhausted { model: String, attempts: u32 },
}

/// Anything that turns a prompt into text.
#[cfg_attr(any(test, feature = "test-hooks"), mockall::automock)]
pub trait LanguageModel {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaClient {
    base_url: String,
    retries: u32,
    http: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LlmError> {
        Self::with_options(base_url, DEFAULT_TIMEOUT, DEFAULT_RETRIES)
    }

    pub fn with_options(
        base_url: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, LlmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Client)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retries,
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn attempt(&self, endpoint: &str, model: &str, prompt: &str) -> Result<String, LlmError> {
        let request_failed = |source| LlmError::Request { endpoint: endpoint.to_string(), source };
        let body = GenerateRequest { model, prompt, stream: false };
        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(request_failed)?;
        let parsed: GenerateResponse = response.json().map_err(request_failed)?;
        Ok(parsed.response)
    }
}

impl LanguageModel for OllamaClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let endpoint = self.endpoint();
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            match self.attempt(&endpoint, model, prompt) {
                Ok(text) => {
                    debug!(model, attempt, chars = text.chars().count(), "Model responded");
                    return Ok(text);
                }
                Err(e) => warn!(model, attempt, error = %e, "Model request failed"),
            }
        }
        Err(LlmError::RetriesExhausted { model: model.to_string(), attempts })
    }
}
