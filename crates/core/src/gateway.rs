use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Result, SummarizeError};

/// JSON schema describing the shape a structured generation must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    name: &'static str,
    schema: Value,
}

impl OutputSchema {
    pub fn new(name: &'static str, schema: Value) -> Self {
        Self { name, schema }
    }

    /// Schema of [`crate::SummarizerOutput`].
    pub fn summarizer_output() -> Self {
        Self::new(
            "summarizer_output",
            json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "The summarization output."
                    },
                    "themes": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "List of themes identified in the text."
                    }
                },
                "required": ["summary", "themes"]
            }),
        )
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Serialized form, as it is counted against the token budget.
    pub fn to_json_string(&self) -> String {
        self.schema.to_string()
    }
}

/// A text-generation backend.
///
/// Errors are opaque to the summarizer: they are wrapped with the round and
/// chunk they happened in and returned to the caller without retrying.
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn max_context_tokens(&self) -> anyhow::Result<usize>;

    fn supports_structured_output(&self) -> bool;

    fn generate(&self, prompt: &str, schema: Option<&OutputSchema>) -> anyhow::Result<String>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_context_tokens(&self) -> anyhow::Result<usize> {
        (**self).max_context_tokens()
    }

    fn supports_structured_output(&self) -> bool {
        (**self).supports_structured_output()
    }

    fn generate(&self, prompt: &str, schema: Option<&OutputSchema>) -> anyhow::Result<String> {
        (**self).generate(prompt, schema)
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_context_tokens(&self) -> anyhow::Result<usize> {
        (**self).max_context_tokens()
    }

    fn supports_structured_output(&self) -> bool {
        (**self).supports_structured_output()
    }

    fn generate(&self, prompt: &str, schema: Option<&OutputSchema>) -> anyhow::Result<String> {
        (**self).generate(prompt, schema)
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_context_tokens(&self) -> anyhow::Result<usize> {
        (**self).max_context_tokens()
    }

    fn supports_structured_output(&self) -> bool {
        (**self).supports_structured_output()
    }

    fn generate(&self, prompt: &str, schema: Option<&OutputSchema>) -> anyhow::Result<String> {
        (**self).generate(prompt, schema)
    }
}

/// Snapshot of what a backend reports about its model, taken once per
/// summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub name: String,
    pub max_context_tokens: usize,
    pub supports_structured_output: bool,
}

impl ModelCapabilities {
    pub fn query<G: TextGenerator + ?Sized>(generator: &G) -> Result<Self> {
        let max_context_tokens = generator.max_context_tokens().map_err(|err| {
            SummarizeError::Configuration(format!(
                "could not read the context length of model {}: {err:#}",
                generator.name()
            ))
        })?;
        Ok(Self {
            name: generator.name().to_string(),
            max_context_tokens,
            supports_structured_output: generator.supports_structured_output(),
        })
    }
}
