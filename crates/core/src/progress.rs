use tracing::{debug, info};

use crate::prompt::PromptRole;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    RoundStarted {
        round: usize,
        role: PromptRole,
        chunks: usize,
    },
    ChunkSummarized {
        round: usize,
        index: usize,
        total: usize,
    },
    RoundFinished {
        round: usize,
        summaries: usize,
        combined_tokens: usize,
        budget: usize,
    },
    Synthesizing {
        rounds: usize,
        content_tokens: usize,
    },
    Finished {
        rounds: usize,
        model_calls: usize,
    },
}

/// Receives progress from a running summarization. Implementations must be
/// cheap; they are called inline between model calls.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Forwards progress to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RoundStarted {
                round,
                role,
                chunks,
            } => info!(round, %role, chunks, "summarizing round"),
            ProgressEvent::ChunkSummarized {
                round,
                index,
                total,
            } => debug!(round, chunk = index + 1, total, "chunk summarized"),
            ProgressEvent::RoundFinished {
                round,
                summaries,
                combined_tokens,
                budget,
            } => info!(round, summaries, combined_tokens, budget, "round finished"),
            ProgressEvent::Synthesizing {
                rounds,
                content_tokens,
            } => info!(rounds, content_tokens, "generating final summary and themes"),
            ProgressEvent::Finished {
                rounds,
                model_calls,
            } => info!(rounds, model_calls, "summarization finished"),
        }
    }
}
