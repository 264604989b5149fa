use std::collections::BTreeMap;
use std::fmt;

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SummarizeError};

const DEFAULT_CHUNK_SUMMARY: &str = "You are reading one section of a longer book.\n\
Write a concise summary of the passage below. Keep the names of characters, places and events, \
and mention any idea the passage keeps returning to.\n\n\
Passage:\n{{ chunk }}\n\nSummary:";

const DEFAULT_INTERMEDIATE_SUMMARY: &str = "The text below is a sequence of partial summaries \
of consecutive sections of a book, in reading order.\n\
Condense them into a single shorter summary that keeps the plot, the main characters and the \
recurring ideas.\n\n\
Partial summaries:\n{{ chunk }}\n\nCondensed summary:";

const DEFAULT_FINAL_SUMMARY: &str = "Below are summaries of consecutive sections of a book, \
in reading order.\n\
Write a summary of the whole book and list its main themes.\n\
Answer with a JSON object of the form {\"summary\": \"...\", \"themes\": [\"...\"]} and nothing else.\n\n\
Section summaries:\n{{ summaries }}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    ChunkSummary,
    IntermediateSummary,
    FinalSummary,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::ChunkSummary => "chunk_summary",
            PromptRole::IntermediateSummary => "intermediate_summary",
            PromptRole::FinalSummary => "final_summary",
        }
    }

    /// Name of the placeholder the role's template is filled through.
    pub fn placeholder(&self) -> &'static str {
        match self {
            PromptRole::ChunkSummary | PromptRole::IntermediateSummary => "chunk",
            PromptRole::FinalSummary => "summaries",
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format templates keyed by prompt role.
///
/// Templates are minijinja strings (`{{ chunk }}`, `{{ summaries }}`);
/// referencing any other variable is an error.
/// Fields missing from a deserialized set fall back to the built-in prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub chunk_summary: String,
    pub intermediate_summary: String,
    pub final_summary: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            chunk_summary: DEFAULT_CHUNK_SUMMARY.to_string(),
            intermediate_summary: DEFAULT_INTERMEDIATE_SUMMARY.to_string(),
            final_summary: DEFAULT_FINAL_SUMMARY.to_string(),
        }
    }
}

impl PromptSet {
    pub fn template(&self, role: PromptRole) -> &str {
        match role {
            PromptRole::ChunkSummary => &self.chunk_summary,
            PromptRole::IntermediateSummary => &self.intermediate_summary,
            PromptRole::FinalSummary => &self.final_summary,
        }
    }

    pub fn render(&self, role: PromptRole, value: &str) -> Result<String> {
        let context = BTreeMap::from([(role.placeholder(), value)]);
        template_env()
            .render_str(self.template(role), context)
            .map_err(|err| SummarizeError::Template {
                role,
                reason: err.to_string(),
            })
    }

    /// Checks that every template substitutes cleanly.
    pub fn validate(&self) -> Result<()> {
        for role in [
            PromptRole::ChunkSummary,
            PromptRole::IntermediateSummary,
            PromptRole::FinalSummary,
        ] {
            self.render(role, "")?;
        }
        Ok(())
    }
}

/// Templates are user-supplied strings, so a fresh environment is built per
/// render. Trailing newlines are kept so prompts render verbatim.
fn template_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}
