use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use booksum_core::{PromptSet, SummarizerConfig, TokenizerKind, DEFAULT_SAFETY_MARGIN};
use booksum_llm::{LlmConfig, LlmProvider};

use crate::cli::ProcessArgs;

const DEFAULT_PROVIDER: &str = "gemini";

#[derive(Debug, Clone)]
pub struct BooksumConfig {
    pub llm: LlmConfig,
    pub summarizer: SummarizerConfig,
    pub tokenizer: TokenizerKind,
    pub prompts: PromptSet,
    pub output_dir: PathBuf,
}

impl BooksumConfig {
    pub fn from_env(args: &ProcessArgs) -> Result<Self> {
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Flags win over environment variables, which win over defaults.
    pub fn resolve<E>(args: &ProcessArgs, lookup: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let provider_name = args
            .provider
            .clone()
            .or_else(|| lookup("BOOKSUM_PROVIDER"))
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let provider = LlmProvider::from_str(&provider_name)
            .ok_or_else(|| anyhow!(format!("unknown provider {provider_name}")))?;
        let model = args
            .model
            .clone()
            .or_else(|| lookup("BOOKSUM_MODEL"))
            .unwrap_or_else(|| provider.default_model().to_string());

        let mut llm = LlmConfig::new(provider)
            .with_model(model)
            .with_timeout(Duration::from_secs(args.timeout_secs));
        llm.api_key = args.api_key.clone().or_else(|| match provider {
            LlmProvider::Gemini => lookup("GEMINI_API_KEY"),
            LlmProvider::OpenAi => lookup("OPENAI_API_KEY"),
            LlmProvider::Ollama | LlmProvider::Local => None,
        });
        if provider.requires_api_key() && llm.api_key.is_none() {
            let var = match provider {
                LlmProvider::OpenAi => "OPENAI_API_KEY",
                _ => "GEMINI_API_KEY",
            };
            bail!(
                "an API key is required for {} models (pass --api-key or set {var})",
                provider.as_str()
            );
        }
        llm.base_url = args.base_url.clone().or_else(|| match provider {
            LlmProvider::Ollama => lookup("OLLAMA_BASE_URL"),
            LlmProvider::OpenAi => lookup("OPENAI_BASE_URL"),
            LlmProvider::Gemini | LlmProvider::Local => None,
        });
        llm.context_tokens = args.context_tokens;

        let summarizer = SummarizerConfig {
            chunk_size: args.chunk_size,
            safety_margin: args.safety_margin.unwrap_or(DEFAULT_SAFETY_MARGIN),
            parallel_chunks: args.parallel,
        };
        let tokenizer: TokenizerKind = args.tokenizer.parse()?;
        let prompts = match &args.prompts {
            Some(path) => load_prompts(path)?,
            None => PromptSet::default(),
        };
        Ok(Self {
            llm,
            summarizer,
            tokenizer,
            prompts,
            output_dir: args.output.clone(),
        })
    }
}

pub fn load_prompts(path: &Path) -> Result<PromptSet> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read prompts {}", path.display()))?;
    let prompts: PromptSet = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid prompts file {}", path.display()))?;
    prompts
        .validate()
        .with_context(|| format!("invalid prompt template in {}", path.display()))?;
    Ok(prompts)
}
