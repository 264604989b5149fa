use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Result, SummarizeError};
use crate::tokens::TokenCounter;

/// Sentence-aligned slice of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    index: usize,
    sentences: Vec<String>,
    token_count: usize,
}

impl Chunk {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn text(&self) -> String {
        self.sentences.join(" ")
    }
}

pub trait TextChunker: Send + Sync {
    fn chunk(&self, text: &str, max_tokens_per_chunk: usize) -> Result<Vec<Chunk>>;
}

/// Greedy sentence packer: a sentence is never split, and one that alone
/// exceeds the limit becomes a chunk of its own.
pub struct SentenceChunker {
    counter: Arc<dyn TokenCounter>,
}

impl SentenceChunker {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }
}

impl TextChunker for SentenceChunker {
    fn chunk(&self, text: &str, max_tokens_per_chunk: usize) -> Result<Vec<Chunk>> {
        if max_tokens_per_chunk == 0 {
            return Err(SummarizeError::InvalidArgument(
                "max_tokens_per_chunk must be a positive integer".to_string(),
            ));
        }
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;
        for sentence in split_sentences(text) {
            let sentence_tokens = self.counter.count(sentence);
            if current.is_empty() || current_tokens + sentence_tokens <= max_tokens_per_chunk {
                current.push(sentence.to_string());
                current_tokens += sentence_tokens;
                continue;
            }
            chunks.push(Chunk {
                index: chunks.len(),
                sentences: std::mem::take(&mut current),
                token_count: current_tokens,
            });
            current.push(sentence.to_string());
            current_tokens = sentence_tokens;
        }
        if !current.is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                sentences: current,
                token_count: current_tokens,
            });
        }
        Ok(chunks)
    }
}

/// Titles and Latin abbreviations whose period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "St.", "Prof.", "Sr.", "Jr.", "Rev.", "Gen.", "Col.", "Capt.",
    "Lt.", "Mt.", "No.", "Vol.", "Fig.", "e.g.", "i.e.",
];

/// Splits text on Unicode sentence boundaries, trimming surrounding whitespace
/// and dropping blank segments. A boundary right after a known abbreviation
/// or a single-letter initial is ignored unless a line break follows it.
pub fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut sentences = Vec::new();
    let mut pending: Option<usize> = None;
    for (start, segment) in text.split_sentence_bound_indices() {
        let begin = pending.take().unwrap_or(start);
        let end = start + segment.len();
        if end < text.len() && continues_after(segment) {
            pending = Some(begin);
            continue;
        }
        sentences.push(&text[begin..end]);
    }
    sentences
        .into_iter()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
}

fn continues_after(segment: &str) -> bool {
    let body = segment.trim_end();
    if segment[body.len()..].contains('\n') {
        return false;
    }
    let last = body
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default()
        .trim_start_matches(|c: char| matches!(c, '(' | '"' | '\'' | '\u{201c}' | '\u{2018}'));
    if ABBREVIATIONS.contains(&last) {
        return true;
    }
    let mut chars = last.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(initial), Some('.'), None) if initial.is_uppercase()
    )
}
