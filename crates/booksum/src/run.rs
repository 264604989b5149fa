use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use booksum_core::{BookProcessor, BookRecord, BookSummary, HierarchicalSummarizer, PromptSet};
use booksum_llm::LlmClient;
use tracing::error;

use crate::books;
use crate::cli::ProcessArgs;
use crate::config::BooksumConfig;
use crate::logging::{self, StageProgress};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<PathBuf>,
}

pub fn run(args: ProcessArgs) -> Result<()> {
    let cfg = BooksumConfig::from_env(&args)?;
    let inputs = books::discover_inputs(&args.input)?;
    if inputs.is_empty() {
        logging::info(format!(
            "no .json or .json.gz book records in {}",
            args.input.display()
        ));
        return Ok(());
    }
    logging::stage(
        "setup",
        format!(
            "using {} model {} (chunk size {}, tokenizer {})",
            cfg.llm.provider.as_str(),
            cfg.llm.model,
            cfg.summarizer.chunk_size,
            cfg.tokenizer
        ),
    );
    let client = LlmClient::new(cfg.llm.clone())?;
    let summarizer = HierarchicalSummarizer::builder(client)
        .config(cfg.summarizer)
        .prompts(cfg.prompts.clone())
        .tokenizer(cfg.tokenizer)
        .observer(Arc::new(StageProgress))
        .build()
        .context("summarizer configuration rejected")?;
    let processor = BookProcessor::new(summarizer);

    let report = process_batch(&inputs, &cfg.output_dir, &cfg.llm.model, |book| {
        Ok(processor.process(book)?)
    })?;
    logging::info(format!(
        "{} processed, {} skipped, {} failed",
        report.processed,
        report.skipped,
        report.failed.len()
    ));
    if !report.failed.is_empty() {
        bail!(
            "{} of {} book(s) failed",
            report.failed.len(),
            inputs.len()
        );
    }
    Ok(())
}

pub fn print_prompts() -> Result<()> {
    let yaml = serde_yaml::to_string(&PromptSet::default())?;
    print!("{yaml}");
    Ok(())
}

/// Summarizes every input whose output file does not exist yet. A failing
/// book is reported and the batch moves on.
fn process_batch<F>(
    inputs: &[PathBuf],
    output_dir: &Path,
    model: &str,
    process: F,
) -> Result<BatchReport>
where
    F: Fn(&BookRecord) -> Result<BookSummary>,
{
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let mut report = BatchReport::default();
    for (idx, input) in inputs.iter().enumerate() {
        let output = books::output_path_for(output_dir, model, input);
        if output.exists() {
            logging::stage(
                "skip",
                format!("{} already summarized at {}", input.display(), output.display()),
            );
            report.skipped += 1;
            continue;
        }
        logging::stage(
            "process",
            format!("book {}/{}: {}", idx + 1, inputs.len(), input.display()),
        );
        let outcome = books::load_book(input)
            .and_then(|book| process(&book))
            .and_then(|summary| books::save_summary(&output, &summary));
        match outcome {
            Ok(()) => {
                logging::stage("save", format!("result saved to {}", output.display()));
                report.processed += 1;
            }
            Err(err) => {
                error!(input = %input.display(), error = %format!("{err:#}"), "book failed");
                logging::stage("error", format!("{}: {err:#}", input.display()));
                report.failed.push(input.clone());
            }
        }
    }
    Ok(report)
}
