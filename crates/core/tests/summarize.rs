use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use booksum_core::{
    BookProcessor, BookRecord, HierarchicalSummarizer, OutputSchema, Person, ProgressEvent,
    ProgressObserver, PromptRole, PromptSet, SummarizeError, TextGenerator, TokenCounter,
    WordCounter, DEFAULT_SAFETY_MARGIN,
};

const FINAL_JSON: &str = "{\"summary\": \"whole book\", \"themes\": [\"loss\", \"return\"]}";

#[derive(Debug, Clone)]
struct Call {
    prompt: String,
    structured: bool,
}

type Respond = dyn Fn(usize, &str, bool) -> anyhow::Result<String> + Send + Sync;

struct ScriptedGateway {
    context: AtomicUsize,
    respond: Box<Respond>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGateway {
    fn new(
        context: usize,
        respond: impl Fn(usize, &str, bool) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            context: AtomicUsize::new(context),
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn structured_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.structured).collect()
    }
}

impl TextGenerator for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    fn max_context_tokens(&self) -> anyhow::Result<usize> {
        Ok(self.context.load(Ordering::SeqCst))
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    fn generate(&self, prompt: &str, schema: Option<&OutputSchema>) -> anyhow::Result<String> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                prompt: prompt.to_string(),
                structured: schema.is_some(),
            });
            calls.len() - 1
        };
        (self.respond)(index, prompt, schema.is_some())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressObserver for Recorder {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn plain_prompts() -> PromptSet {
    PromptSet {
        chunk_summary: "{{ chunk }}".to_string(),
        intermediate_summary: "I {{ chunk }}".to_string(),
        final_summary: "{{ summaries }}".to_string(),
    }
}

/// Context length that leaves exactly `budget` tokens with no safety margin
/// and the plain prompts.
fn context_for_budget(budget: usize) -> usize {
    let schema = OutputSchema::summarizer_output().to_json_string();
    budget + WordCounter.count("{{ summaries }}") + WordCounter.count(&schema)
}

#[test]
fn empty_input_never_calls_the_model() {
    let gateway = ScriptedGateway::new(10_000, |_, _, _| Ok("unused".to_string()));
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .build()
        .unwrap();
    let output = summarizer.summarize("").unwrap();
    assert_eq!(output.summary(), "");
    assert!(output.themes().is_empty());
    assert!(gateway.calls().is_empty());
}

#[test]
fn three_chunks_feed_one_synthesis_call() {
    let gateway = ScriptedGateway::new(10_000, |index, _, structured| {
        if structured {
            Ok(FINAL_JSON.to_string())
        } else {
            Ok(format!("summary{index}"))
        }
    });
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .chunk_size(4)
        .build()
        .unwrap();
    let output = summarizer
        .summarize("First sentence here. Second sentence here. Third sentence here.")
        .unwrap();

    assert_eq!(output.summary(), "whole book");
    assert_eq!(output.themes(), ["loss".to_string(), "return".to_string()]);
    let calls = gateway.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[0].prompt.contains("First sentence here."));
    assert!(calls[2].prompt.contains("Third sentence here."));
    let finals = gateway.structured_calls();
    assert_eq!(finals.len(), 1);
    assert!(finals[0].prompt.contains("summary0\n\nsummary1\n\nsummary2"));
}

#[test]
fn progress_events_arrive_in_order() {
    let gateway = ScriptedGateway::new(10_000, |_, _, structured| {
        Ok(if structured {
            FINAL_JSON.to_string()
        } else {
            "part".to_string()
        })
    });
    let recorder = Arc::new(Recorder::default());
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .chunk_size(4)
        .observer(recorder.clone())
        .build()
        .unwrap();
    summarizer
        .summarize("First sentence here. Second sentence here.")
        .unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 6);
    assert_eq!(
        events[0],
        ProgressEvent::RoundStarted {
            round: 0,
            role: PromptRole::ChunkSummary,
            chunks: 2,
        }
    );
    assert_eq!(
        events[1],
        ProgressEvent::ChunkSummarized {
            round: 0,
            index: 0,
            total: 2,
        }
    );
    assert!(matches!(
        events[3],
        ProgressEvent::RoundFinished {
            round: 0,
            summaries: 2,
            ..
        }
    ));
    assert!(matches!(
        events[4],
        ProgressEvent::Synthesizing { rounds: 1, .. }
    ));
    assert_eq!(
        events[5],
        ProgressEvent::Finished {
            rounds: 1,
            model_calls: 3,
        }
    );
}

#[test]
fn oversized_summaries_are_reduced_with_the_intermediate_prompt() {
    let gateway = ScriptedGateway::new(context_for_budget(10), |_, _, structured| {
        if structured {
            Ok(FINAL_JSON.to_string())
        } else {
            Ok("Short.".to_string())
        }
    });
    let recorder = Arc::new(Recorder::default());
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .prompts(plain_prompts())
        .safety_margin(0)
        .chunk_size(5)
        .observer(recorder.clone())
        .build()
        .unwrap();
    let text = "Aa bb cc. Dd ee ff. Gg hh ii. Jj kk ll. Mm nn oo. Pp qq rr. Ss tt uu. Vv ww xx.";
    let output = summarizer.summarize(text).unwrap();
    assert_eq!(output.summary(), "whole book");

    let calls = gateway.calls();
    // 8 chunk summaries, 4 intermediate summaries, 1 synthesis.
    assert_eq!(calls.len(), 13);
    assert!(calls[..8].iter().all(|c| !c.prompt.starts_with("I ")));
    assert!(calls[8..12].iter().all(|c| c.prompt.starts_with("I ")));
    assert!(calls[12].structured);

    let events = recorder.events.lock().unwrap();
    assert!(events.contains(&ProgressEvent::RoundStarted {
        round: 1,
        role: PromptRole::IntermediateSummary,
        chunks: 4,
    }));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Finished {
            rounds: 2,
            model_calls: 13,
        })
    );
}

#[test]
fn non_shrinking_summaries_trip_the_convergence_guard() {
    // Echoes its input back, so a reduction round never shrinks anything.
    let gateway = ScriptedGateway::new(context_for_budget(10), |index, prompt, _| {
        if index > 50 {
            return Err(anyhow!("reduction loop did not stop"));
        }
        Ok(prompt.trim_start_matches("I ").to_string())
    });
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .prompts(plain_prompts())
        .safety_margin(0)
        .chunk_size(5)
        .build()
        .unwrap();
    let err = summarizer
        .summarize("Aa bb cc. Dd ee ff. Gg hh ii. Jj kk ll.")
        .unwrap_err();
    match err {
        SummarizeError::Unreducible {
            round,
            previous,
            current,
        } => {
            assert_eq!(round, 1);
            assert_eq!(previous, 4);
            assert_eq!(current, 4);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(gateway.calls().len(), 8);
    assert!(gateway.structured_calls().is_empty());
}

#[test]
fn chunk_size_above_budget_fails_before_any_work() {
    let schema = OutputSchema::summarizer_output().to_json_string();
    let context = 3000
        + DEFAULT_SAFETY_MARGIN
        + WordCounter.count(PromptSet::default().template(PromptRole::FinalSummary))
        + WordCounter.count(&schema);
    let gateway = ScriptedGateway::new(context, |_, _, _| Ok(String::new()));

    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .chunk_size(3000)
        .build()
        .unwrap();
    assert_eq!(summarizer.budget().unwrap().available(), 3000);

    let err = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .chunk_size(5000)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SummarizeError::Configuration(_)));
    assert!(gateway.calls().is_empty());
}

#[test]
fn budget_is_rechecked_on_every_call() {
    let gateway = ScriptedGateway::new(10_000, |_, _, _| Ok("x".to_string()));
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .chunk_size(1000)
        .build()
        .unwrap();
    gateway.context.store(500, Ordering::SeqCst);
    let err = summarizer.summarize("Some text.").unwrap_err();
    assert!(matches!(err, SummarizeError::Configuration(_)));
    assert!(gateway.calls().is_empty());
}

#[test]
fn gateway_failure_stops_the_run_with_its_position() {
    let gateway = ScriptedGateway::new(10_000, |index, _, _| {
        if index == 1 {
            Err(anyhow!("429 too many requests"))
        } else {
            Ok("fine".to_string())
        }
    });
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .chunk_size(4)
        .build()
        .unwrap();
    let err = summarizer
        .summarize("First sentence here. Second sentence here. Third sentence here.")
        .unwrap_err();
    match &err {
        SummarizeError::Gateway {
            role,
            round,
            chunk,
            source,
        } => {
            assert_eq!(*role, PromptRole::ChunkSummary);
            assert_eq!(*round, 0);
            assert_eq!(*chunk, Some(1));
            assert!(source.to_string().contains("429"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(gateway.calls().len(), 2);
}

#[test]
fn unparseable_synthesis_keeps_the_raw_text() {
    let gateway = ScriptedGateway::new(10_000, |_, _, structured| {
        Ok(if structured {
            "I could not produce JSON".to_string()
        } else {
            "part".to_string()
        })
    });
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .build()
        .unwrap();
    let err = summarizer.summarize("A single sentence.").unwrap_err();
    assert_eq!(err.raw_output(), Some("I could not produce JSON"));
}

#[test]
fn fenced_synthesis_output_is_accepted() {
    let gateway = ScriptedGateway::new(10_000, |_, _, structured| {
        Ok(if structured {
            format!("```json\n{FINAL_JSON}\n```")
        } else {
            "part".to_string()
        })
    });
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .build()
        .unwrap();
    let output = summarizer.summarize("A single sentence.").unwrap();
    assert_eq!(output.summary(), "whole book");
}

#[test]
fn book_processor_carries_metadata_through() {
    let gateway = ScriptedGateway::new(10_000, |_, _, structured| {
        Ok(if structured {
            FINAL_JSON.to_string()
        } else {
            "part".to_string()
        })
    });
    let summarizer = HierarchicalSummarizer::builder(&gateway)
        .token_counter(Arc::new(WordCounter))
        .build()
        .unwrap();
    let processor = BookProcessor::new(summarizer);
    let book = BookRecord {
        text: "It was the best of times. It was the worst of times.".to_string(),
        title: "A Tale of Two Cities".to_string(),
        authors: vec![Person {
            name: "Dickens, Charles".to_string(),
            birth_year: Some(1812),
            death_year: Some(1870),
        }],
        source_id: Some(98),
    };
    let result = processor.process(&book).unwrap();
    assert_eq!(result.summary, "whole book");
    assert_eq!(result.themes, vec!["loss".to_string(), "return".to_string()]);
    assert_eq!(result.title, book.title);
    assert_eq!(result.authors, book.authors);
    assert_eq!(result.source_id, Some(98));
}
