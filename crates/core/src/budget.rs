use crate::error::{Result, SummarizeError};
use crate::gateway::{ModelCapabilities, OutputSchema};
use crate::tokens::TokenCounter;

pub const DEFAULT_SAFETY_MARGIN: usize = 100;

/// Room left for content in the final synthesis call, after the safety
/// margin and the fixed prompt/schema overhead are taken out of the model's
/// context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub max_context_tokens: usize,
    pub safety_margin: usize,
    pub template_overhead: usize,
    pub schema_overhead: usize,
    available: usize,
}

impl TokenBudget {
    pub fn compute(
        capabilities: &ModelCapabilities,
        safety_margin: usize,
        final_template: &str,
        schema: &OutputSchema,
        counter: &dyn TokenCounter,
    ) -> Result<Self> {
        let template_overhead = counter.count(final_template);
        let schema_overhead = counter.count(&schema.to_json_string());
        Self::from_parts(
            capabilities.max_context_tokens,
            safety_margin,
            template_overhead,
            schema_overhead,
        )
        .map_err(|deficit| {
            SummarizeError::Configuration(format!(
                "model {} has a context of {} tokens, {deficit} short of the fixed overhead \
                 (safety margin {safety_margin}, template {template_overhead}, schema {schema_overhead})",
                capabilities.name, capabilities.max_context_tokens
            ))
        })
    }

    /// Returns the token deficit when the overhead does not fit.
    fn from_parts(
        max_context_tokens: usize,
        safety_margin: usize,
        template_overhead: usize,
        schema_overhead: usize,
    ) -> std::result::Result<Self, usize> {
        let overhead = safety_margin + template_overhead + schema_overhead;
        let available = max_context_tokens
            .checked_sub(overhead)
            .ok_or_else(|| overhead - max_context_tokens)?;
        Ok(Self {
            max_context_tokens,
            safety_margin,
            template_overhead,
            schema_overhead,
            available,
        })
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.available
    }

    pub fn ensure_chunk_size(&self, chunk_size: usize) -> Result<()> {
        if chunk_size > self.available {
            return Err(SummarizeError::Configuration(format!(
                "chunk size {chunk_size} exceeds the model's token budget {}; \
                 lower the chunk size or use a model with a larger context",
                self.available
            )));
        }
        Ok(())
    }
}
