use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "booksum",
    about = "Hierarchical book summarization with Gemini, Ollama or OpenAI-compatible models"
)]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize one book record or every record in a directory.
    Process(ProcessArgs),
    /// Print the built-in prompt templates as YAML, ready to edit.
    Prompts,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ProcessArgs {
    /// A `.json` / `.json.gz` book record, or a directory of them.
    pub input: PathBuf,
    /// gemini, ollama, openai or local (env: BOOKSUM_PROVIDER).
    #[arg(long)]
    pub provider: Option<String>,
    /// Model name; defaults per provider (env: BOOKSUM_MODEL).
    #[arg(long)]
    pub model: Option<String>,
    /// API key (env: GEMINI_API_KEY or OPENAI_API_KEY).
    #[arg(long)]
    pub api_key: Option<String>,
    /// Server URL (env: OLLAMA_BASE_URL or OPENAI_BASE_URL).
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long, default_value_t = 28_000)]
    pub chunk_size: usize,
    #[arg(long)]
    pub safety_margin: Option<usize>,
    /// Overrides the context length the provider reports.
    #[arg(long)]
    pub context_tokens: Option<usize>,
    /// cl100k, o200k, p50k or words.
    #[arg(long, default_value = "cl100k")]
    pub tokenizer: String,
    /// YAML file with chunk_summary / intermediate_summary / final_summary.
    #[arg(long)]
    pub prompts: Option<PathBuf>,
    #[arg(long, short = 'o', default_value = "book_processor_output")]
    pub output: PathBuf,
    /// Summarize the chunks of a round concurrently.
    #[arg(long, default_value_t = false)]
    pub parallel: bool,
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,
}
