use thiserror::Error;

use crate::prompt::PromptRole;

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(
        "reduction round {round} produced {current} chunk(s) from {previous}; the input cannot be reduced further"
    )]
    Unreducible {
        round: usize,
        previous: usize,
        current: usize,
    },
    #[error("model output could not be parsed as JSON ({reason}): {raw}")]
    OutputParse { raw: String, reason: String },
    #[error("prompt template {role} could not be rendered: {reason}")]
    Template { role: PromptRole, reason: String },
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("{role} generation failed in round {round}{}", chunk_suffix(.chunk))]
    Gateway {
        role: PromptRole,
        round: usize,
        chunk: Option<usize>,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, SummarizeError>;

impl SummarizeError {
    /// Raw model text attached to the error, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            SummarizeError::OutputParse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

fn chunk_suffix(chunk: &Option<usize>) -> String {
    match chunk {
        Some(index) => format!(" (chunk {index})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_names_round_and_chunk() {
        let err = SummarizeError::Gateway {
            role: PromptRole::ChunkSummary,
            round: 2,
            chunk: Some(7),
            source: anyhow::anyhow!("connection reset"),
        };
        assert_eq!(
            err.to_string(),
            "chunk_summary generation failed in round 2 (chunk 7)"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn synthesis_error_has_no_chunk() {
        let err = SummarizeError::Gateway {
            role: PromptRole::FinalSummary,
            round: 0,
            chunk: None,
            source: anyhow::anyhow!("timeout"),
        };
        assert_eq!(err.to_string(), "final_summary generation failed in round 0");
    }

    #[test]
    fn raw_output_only_for_parse_errors() {
        let err = SummarizeError::OutputParse {
            raw: "oops".to_string(),
            reason: "expected value".to_string(),
        };
        assert_eq!(err.raw_output(), Some("oops"));
        assert!(SummarizeError::Configuration("x".into()).raw_output().is_none());
    }
}
