use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SummarizeError};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:\w+)?\s*\n?(.*?)\n?```").expect("fenced block regex"));

/// Final result of a summarization: a summary and the themes found in the
/// text. Built once; fields are read-only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SummarizerOutput {
    summary: String,
    themes: Vec<String>,
}

impl SummarizerOutput {
    pub fn new(summary: impl Into<String>, themes: Vec<String>) -> Self {
        Self {
            summary: summary.into(),
            themes,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn themes(&self) -> &[String] {
        &self.themes
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.themes.is_empty()
    }

    pub fn into_parts(self) -> (String, Vec<String>) {
        (self.summary, self.themes)
    }
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    themes: Vec<String>,
}

/// Extracts a [`SummarizerOutput`] from model text.
///
/// The first fenced code block is parsed when there is one, the whole text
/// otherwise.
pub fn parse_output(raw: &str) -> Result<SummarizerOutput> {
    let payload = FENCED_BLOCK
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str().trim())
        .unwrap_or(raw);
    let parsed: RawOutput =
        serde_json::from_str(payload).map_err(|err| SummarizeError::OutputParse {
            raw: raw.to_string(),
            reason: err.to_string(),
        })?;
    Ok(SummarizerOutput::new(parsed.summary, parsed.themes))
}
