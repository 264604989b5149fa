use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::budget::{TokenBudget, DEFAULT_SAFETY_MARGIN};
use crate::chunk::{Chunk, SentenceChunker, TextChunker};
use crate::error::{Result, SummarizeError};
use crate::gateway::{ModelCapabilities, OutputSchema, TextGenerator};
use crate::parse::{parse_output, SummarizerOutput};
use crate::progress::{ProgressEvent, ProgressObserver, TracingProgress};
use crate::prompt::{PromptRole, PromptSet};
use crate::tokens::{TokenCounter, TokenizerKind};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
const SUMMARY_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizerConfig {
    /// Upper bound, in tokens, of every chunk sent to the model.
    pub chunk_size: usize,
    pub safety_margin: usize,
    /// Summarize the chunks of a round concurrently. Results are still
    /// assembled in chunk order.
    pub parallel_chunks: bool,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            parallel_chunks: false,
        }
    }
}

pub struct SummarizerBuilder<G> {
    generator: G,
    config: SummarizerConfig,
    prompts: PromptSet,
    tokenizer: TokenizerKind,
    counter: Option<Arc<dyn TokenCounter>>,
    chunker: Option<Box<dyn TextChunker>>,
    observer: Arc<dyn ProgressObserver>,
}

impl<G: TextGenerator> SummarizerBuilder<G> {
    fn new(generator: G) -> Self {
        Self {
            generator,
            config: SummarizerConfig::default(),
            prompts: PromptSet::default(),
            tokenizer: TokenizerKind::default(),
            counter: None,
            chunker: None,
            observer: Arc::new(TracingProgress),
        }
    }

    pub fn config(mut self, config: SummarizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn safety_margin(mut self, margin: usize) -> Self {
        self.config.safety_margin = margin;
        self
    }

    pub fn parallel_chunks(mut self, parallel: bool) -> Self {
        self.config.parallel_chunks = parallel;
        self
    }

    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.tokenizer = kind;
        self
    }

    /// Overrides the counter built from [`Self::tokenizer`].
    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn chunker(mut self, chunker: Box<dyn TextChunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validates the configuration against the model before any text is
    /// seen: templates must render, and the chunk size must fit the budget.
    pub fn build(self) -> Result<HierarchicalSummarizer<G>> {
        if self.config.chunk_size == 0 {
            return Err(SummarizeError::InvalidArgument(
                "chunk_size must be a positive integer".to_string(),
            ));
        }
        self.prompts.validate()?;
        let counter = match self.counter {
            Some(counter) => counter,
            None => self.tokenizer.build()?,
        };
        let chunker = self
            .chunker
            .unwrap_or_else(|| Box::new(SentenceChunker::new(counter.clone())));
        let summarizer = HierarchicalSummarizer {
            generator: self.generator,
            chunker,
            counter,
            prompts: self.prompts,
            config: self.config,
            observer: self.observer,
            schema: OutputSchema::summarizer_output(),
        };
        let budget = summarizer.budget()?;
        budget.ensure_chunk_size(summarizer.config.chunk_size)?;
        debug!(
            model = summarizer.generator.name(),
            chunk_size = summarizer.config.chunk_size,
            budget = budget.available(),
            "summarizer ready"
        );
        Ok(summarizer)
    }
}

/// Summarizes text of any length by summarizing sentence-aligned chunks and
/// re-summarizing the joined summaries until they fit a single synthesis call.
pub struct HierarchicalSummarizer<G> {
    generator: G,
    chunker: Box<dyn TextChunker>,
    counter: Arc<dyn TokenCounter>,
    prompts: PromptSet,
    config: SummarizerConfig,
    observer: Arc<dyn ProgressObserver>,
    schema: OutputSchema,
}

impl<G: TextGenerator> HierarchicalSummarizer<G> {
    pub fn builder(generator: G) -> SummarizerBuilder<G> {
        SummarizerBuilder::new(generator)
    }

    pub fn new(generator: G, config: SummarizerConfig) -> Result<Self> {
        Self::builder(generator).config(config).build()
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Budget for the model as it reports itself right now.
    pub fn budget(&self) -> Result<TokenBudget> {
        let capabilities = ModelCapabilities::query(&self.generator)?;
        self.budget_for(&capabilities)
    }

    fn budget_for(&self, capabilities: &ModelCapabilities) -> Result<TokenBudget> {
        TokenBudget::compute(
            capabilities,
            self.config.safety_margin,
            self.prompts.template(PromptRole::FinalSummary),
            &self.schema,
            self.counter.as_ref(),
        )
    }

    pub fn summarize(&self, text: &str) -> Result<SummarizerOutput> {
        let capabilities = ModelCapabilities::query(&self.generator)?;
        let budget = self.budget_for(&capabilities)?;
        budget.ensure_chunk_size(self.config.chunk_size)?;
        info!(
            model = %capabilities.name,
            budget = budget.available(),
            chunk_size = self.config.chunk_size,
            "starting hierarchical summarization"
        );

        let mut round = 0usize;
        let mut summaries = self.summarize_round(text, PromptRole::ChunkSummary, round)?;
        if summaries.is_empty() {
            debug!("no chunks to process");
            return Ok(SummarizerOutput::empty());
        }
        let mut model_calls = summaries.len();
        let mut combined = summaries.join(SUMMARY_SEPARATOR);
        loop {
            let combined_tokens = self.counter.count(&combined);
            self.observer.on_event(&ProgressEvent::RoundFinished {
                round,
                summaries: summaries.len(),
                combined_tokens,
                budget: budget.available(),
            });
            if budget.fits(combined_tokens) {
                break;
            }
            let previous = summaries.len();
            round += 1;
            warn!(
                round,
                combined_tokens,
                budget = budget.available(),
                "combined intermediate summaries exceed the budget, summarizing again"
            );
            summaries = self.summarize_round(&combined, PromptRole::IntermediateSummary, round)?;
            model_calls += summaries.len();
            // Fewer chunks every round, or the loop could never end.
            if summaries.len() >= previous {
                return Err(SummarizeError::Unreducible {
                    round,
                    previous,
                    current: summaries.len(),
                });
            }
            combined = summaries.join(SUMMARY_SEPARATOR);
        }

        let output = self.synthesize(&combined, &capabilities, round)?;
        model_calls += 1;
        self.observer.on_event(&ProgressEvent::Finished {
            rounds: round + 1,
            model_calls,
        });
        Ok(output)
    }

    fn summarize_round(&self, text: &str, role: PromptRole, round: usize) -> Result<Vec<String>> {
        let chunks = self.chunker.chunk(text, self.config.chunk_size)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let total = chunks.len();
        self.observer.on_event(&ProgressEvent::RoundStarted {
            round,
            role,
            chunks: total,
        });
        if self.config.parallel_chunks {
            chunks
                .par_iter()
                .map(|chunk| self.summarize_chunk(chunk, role, round, total))
                .collect()
        } else {
            chunks
                .iter()
                .map(|chunk| self.summarize_chunk(chunk, role, round, total))
                .collect()
        }
    }

    fn summarize_chunk(
        &self,
        chunk: &Chunk,
        role: PromptRole,
        round: usize,
        total: usize,
    ) -> Result<String> {
        let prompt = self.prompts.render(role, &chunk.text())?;
        debug!(
            round,
            chunk = chunk.index(),
            tokens = chunk.token_count(),
            "summarizing chunk"
        );
        let summary =
            self.generator
                .generate(&prompt, None)
                .map_err(|source| SummarizeError::Gateway {
                    role,
                    round,
                    chunk: Some(chunk.index()),
                    source,
                })?;
        self.observer.on_event(&ProgressEvent::ChunkSummarized {
            round,
            index: chunk.index(),
            total,
        });
        Ok(summary)
    }

    fn synthesize(
        &self,
        combined: &str,
        capabilities: &ModelCapabilities,
        round: usize,
    ) -> Result<SummarizerOutput> {
        self.observer.on_event(&ProgressEvent::Synthesizing {
            rounds: round + 1,
            content_tokens: self.counter.count(combined),
        });
        if !capabilities.supports_structured_output {
            debug!(
                model = %capabilities.name,
                "model has no structured output; relying on the prompt for the JSON shape"
            );
        }
        let prompt = self.prompts.render(PromptRole::FinalSummary, combined)?;
        let raw = self
            .generator
            .generate(&prompt, Some(&self.schema))
            .map_err(|source| SummarizeError::Gateway {
                role: PromptRole::FinalSummary,
                round,
                chunk: None,
                source,
            })?;
        parse_output(&raw)
    }
}
