use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::gateway::TextGenerator;
use crate::summarizer::HierarchicalSummarizer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub birth_year: Option<i32>,
    #[serde(default)]
    pub death_year: Option<i32>,
}

/// A document to summarize, with the metadata carried through to the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Person>,
    #[serde(default, alias = "gutenberg_id")]
    pub source_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSummary {
    pub summary: String,
    pub title: String,
    pub authors: Vec<Person>,
    pub themes: Vec<String>,
    pub source_id: Option<u64>,
}

pub struct BookProcessor<G> {
    summarizer: HierarchicalSummarizer<G>,
}

impl<G: TextGenerator> BookProcessor<G> {
    pub fn new(summarizer: HierarchicalSummarizer<G>) -> Self {
        Self { summarizer }
    }

    pub fn summarizer(&self) -> &HierarchicalSummarizer<G> {
        &self.summarizer
    }

    pub fn process(&self, book: &BookRecord) -> Result<BookSummary> {
        let (summary, themes) = self.summarizer.summarize(&book.text)?.into_parts();
        info!(title = %book.title, themes = themes.len(), "book processed");
        Ok(BookSummary {
            summary,
            title: book.title.clone(),
            authors: book.authors.clone(),
            themes,
            source_id: book.source_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_accepts_gutenberg_id_and_defaults() {
        let record: BookRecord = serde_json::from_value(json!({
            "text": "Call me Ishmael.",
            "title": "Moby Dick",
            "authors": [{"name": "Melville, Herman", "birth_year": 1819, "death_year": 1891}],
            "gutenberg_id": 2701
        }))
        .unwrap();
        assert_eq!(record.source_id, Some(2701));
        assert_eq!(record.authors[0].birth_year, Some(1819));

        let bare: BookRecord = serde_json::from_value(json!({ "text": "x" })).unwrap();
        assert_eq!(bare.title, "");
        assert!(bare.authors.is_empty());
        assert_eq!(bare.source_id, None);
    }

    #[test]
    fn person_years_are_optional() {
        let person: Person = serde_json::from_value(json!({ "name": "Anonymous" })).unwrap();
        assert_eq!(person.birth_year, None);
        assert_eq!(person.death_year, None);
    }
}
