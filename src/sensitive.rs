//! Sensitive Filter - Word Removal and Brand Aliasing
//!
//! A single textual pass: sensitive words first, then brand aliases.
//! Replacements are not re-scanned.

use crate::config::SensitiveDictionary;

pub const SCISSOR_MARKER: &str = "✂️";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub text: String,
    /// Matched tokens in match order. Not deduplicated.
    pub hits: Vec<String>,
}

pub struct SensitiveFilter {
    dictionary: SensitiveDictionary,
}

impl SensitiveFilter {
    pub fn new(dictionary: SensitiveDictionary) -> Self {
        Self { dictionary }
    }

    pub fn apply(&self, text: &str) -> FilterOutcome {
        let mut hits = vec![];
        let mut normalized = text.to_string();

        for word in &self.dictionary.sensitive_words {
            if !word.is_empty() && normalized.contains(word.as_str()) {
                hits.push(word.clone());
                normalized = normalized.replace(word.as_str(), SCISSOR_MARKER);
            }
        }
        for (alias, replacement) in &self.dictionary.brand_alias_mapping {
            if !alias.is_empty() && normalized.contains(alias.as_str()) {
                hits.push(alias.clone());
                normalized = normalized.replace(alias.as_str(), replacement);
            }
        }

        FilterOutcome { text: normalized, hits }
    }

    /// Report what `apply` would flag without rewriting anything.
    pub fn scan(&self, text: &str) -> Vec<String> {
        let words = self.dictionary.sensitive_words.iter();
        let aliases = self.dictionary.brand_alias_mapping.iter().map(|(alias, _)| alias);
        words
            .chain(aliases)
            .filter(|token| !token.is_empty() && text.contains(token.as_str()))
            .cloned()
            .collect()
    }
}
