mod book;
mod budget;
mod chunk;
mod error;
mod gateway;
mod parse;
mod progress;
mod prompt;
mod summarizer;
mod tokens;

pub use book::{BookProcessor, BookRecord, BookSummary, Person};
pub use budget::{TokenBudget, DEFAULT_SAFETY_MARGIN};
pub use chunk::{split_sentences, Chunk, SentenceChunker, TextChunker};
pub use error::{Result, SummarizeError};
pub use gateway::{ModelCapabilities, OutputSchema, TextGenerator};
pub use parse::{parse_output, SummarizerOutput};
pub use progress::{NoopProgress, ProgressEvent, ProgressObserver, TracingProgress};
pub use prompt::{PromptRole, PromptSet};
pub use summarizer::{
    HierarchicalSummarizer, SummarizerBuilder, SummarizerConfig, DEFAULT_CHUNK_SIZE,
};
pub use tokens::{word_tokens, BpeCounter, TokenCounter, TokenizerKind, WordCounter};
