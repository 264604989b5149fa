use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

use booksum_core::{ProgressEvent, ProgressObserver};
use tracing_subscriber::EnvFilter;

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Installs the tracing subscriber (`RUST_LOG` wins; otherwise `info`, or
/// `debug` when verbose) and turns on verbose stage lines.
pub fn init(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
    let default_level = if enabled { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if enabled {
        info("verbose logging enabled");
    }
}

pub fn verbose_enabled() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn info(message: impl AsRef<str>) {
    eprintln!("[booksum] {}", message.as_ref());
}

pub fn stage(stage: &str, message: impl AsRef<str>) {
    eprintln!("[booksum::{}] {}", stage, message.as_ref());
}

pub fn verbose(message: impl AsRef<str>) {
    if verbose_enabled() {
        eprintln!("[booksum::verbose] {}", message.as_ref());
    }
}

pub fn env_flag() -> bool {
    env::var("BOOKSUM_VERBOSE")
        .map(|value| parse_bool(value.trim()))
        .unwrap_or(false)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Prints summarization progress as stage lines on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageProgress;

impl ProgressObserver for StageProgress {
    fn on_event(&self, event: &ProgressEvent) {
        if let Some(line) = describe(event) {
            stage("summarize", line);
        } else if let ProgressEvent::ChunkSummarized {
            round,
            index,
            total,
        } = event
        {
            verbose(format!("round {round}: chunk {}/{total} done", index + 1));
        }
    }
}

fn describe(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::RoundStarted {
            round,
            role,
            chunks,
        } => Some(format!("round {round}: {chunks} chunk(s) with {role}")),
        ProgressEvent::ChunkSummarized { .. } => None,
        ProgressEvent::RoundFinished {
            round,
            summaries,
            combined_tokens,
            budget,
        } => Some(if combined_tokens <= budget {
            format!("round {round}: {summaries} summaries, {combined_tokens}/{budget} tokens, fits")
        } else {
            format!(
                "round {round}: {summaries} summaries, {combined_tokens}/{budget} tokens, reducing again"
            )
        }),
        ProgressEvent::Synthesizing {
            rounds,
            content_tokens,
        } => Some(format!(
            "final synthesis after {rounds} round(s) over {content_tokens} tokens"
        )),
        ProgressEvent::Finished {
            rounds,
            model_calls,
        } => Some(format!("done: {rounds} round(s), {model_calls} model call(s)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booksum_core::PromptRole;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for raw in ["1", "true", "YES", " on "] {
            assert!(parse_bool(raw), "{raw}");
        }
        for raw in ["0", "false", "", "maybe"] {
            assert!(!parse_bool(raw), "{raw}");
        }
    }

    #[test]
    fn rounds_describe_their_outcome() {
        let fits = describe(&ProgressEvent::RoundFinished {
            round: 0,
            summaries: 3,
            combined_tokens: 90,
            budget: 100,
        })
        .unwrap();
        assert!(fits.ends_with("fits"));
        let again = describe(&ProgressEvent::RoundFinished {
            round: 1,
            summaries: 12,
            combined_tokens: 900,
            budget: 100,
        })
        .unwrap();
        assert!(again.ends_with("reducing again"));
        let started = describe(&ProgressEvent::RoundStarted {
            round: 1,
            role: PromptRole::IntermediateSummary,
            chunks: 4,
        })
        .unwrap();
        assert_eq!(started, "round 1: 4 chunk(s) with intermediate_summary");
        assert!(describe(&ProgressEvent::ChunkSummarized {
            round: 0,
            index: 0,
            total: 1
        })
        .is_none());
    }
}
