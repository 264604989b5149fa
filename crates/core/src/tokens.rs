use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Result, SummarizeError};

/// Counts tokens in a piece of text. Budgets and chunk sizes are expressed in
/// whatever unit the active counter produces.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn count_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|text| self.count(text)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenizerKind {
    #[default]
    Cl100k,
    O200k,
    P50k,
    Words,
}

impl TokenizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerKind::Cl100k => "cl100k",
            TokenizerKind::O200k => "o200k",
            TokenizerKind::P50k => "p50k",
            TokenizerKind::Words => "words",
        }
    }

    pub fn build(&self) -> Result<Arc<dyn TokenCounter>> {
        let bpe = match self {
            TokenizerKind::Cl100k => tiktoken_rs::cl100k_base(),
            TokenizerKind::O200k => tiktoken_rs::o200k_base(),
            TokenizerKind::P50k => tiktoken_rs::p50k_base(),
            TokenizerKind::Words => return Ok(Arc::new(WordCounter)),
        }
        .map_err(|e| SummarizeError::Tokenizer(e.to_string()))?;
        Ok(Arc::new(BpeCounter::new(bpe)))
    }
}

impl FromStr for TokenizerKind {
    type Err = SummarizeError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "cl100k" | "cl100k_base" => Ok(TokenizerKind::Cl100k),
            "o200k" | "o200k_base" => Ok(TokenizerKind::O200k),
            "p50k" | "p50k_base" | "gpt2" => Ok(TokenizerKind::P50k),
            "words" => Ok(TokenizerKind::Words),
            other => Err(SummarizeError::Tokenizer(format!(
                "unknown tokenizer '{other}' (expected cl100k, o200k, p50k or words)"
            ))),
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte-pair encoding counter backed by `tiktoken-rs`.
pub struct BpeCounter {
    bpe: CoreBPE,
}

impl BpeCounter {
    pub fn new(bpe: CoreBPE) -> Self {
        Self { bpe }
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Counts words and punctuation marks as separate tokens, using Unicode word
/// boundaries. Whitespace never counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        word_tokens(text).count()
    }
}

pub fn word_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split_word_bounds()
        .filter(|segment| !segment.trim().is_empty())
}
