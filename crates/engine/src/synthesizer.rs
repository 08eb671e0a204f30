//! Compact-and-refine response synthesis
//!
//! Retrieved chunks are packed into batches under a character budget. The
//! first useful batch produces an answer and every later batch refines it.
//! Each pass returns a structured answer; passes that report the context as
//! unhelpful leave the current answer untouched.

use crate::templates::{render_qa, render_refine, NO_ANSWER};
use docchat_common::errors::Result;
use docchat_common::llm::{strip_code_fences, ChatModel};
use docchat_common::timeout::llm_deadline;
use docchat_index::SynthesisKind;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Character budget for one packed context batch
pub const DEFAULT_CONTEXT_BUDGET: usize = 12_000;

const CHUNK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct StructuredAnswer {
    answer: String,
    #[serde(default = "default_satisfied")]
    query_satisfied: bool,
}

fn default_satisfied() -> bool {
    true
}

pub struct Synthesizer {
    llm: Arc<dyn ChatModel>,
    kind: SynthesisKind,
    doc_titles: String,
    context_budget: usize,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        kind: SynthesisKind,
        doc_titles: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            kind,
            doc_titles: doc_titles.into(),
            context_budget: DEFAULT_CONTEXT_BUDGET,
            timeout,
        }
    }

    pub fn with_context_budget(mut self, chars: usize) -> Self {
        self.context_budget = chars.max(1);
        self
    }

    pub fn kind(&self) -> SynthesisKind {
        self.kind
    }

    /// Answer `query` from `chunks`, or return the soft no-answer text
    pub async fn synthesize(&self, query: &str, chunks: &[String]) -> Result<String> {
        let batches = pack_chunks(chunks, self.context_budget);
        let mut answer: Option<String> = None;

        for (pass, context) in batches.iter().enumerate() {
            let prompt = match &answer {
                None => render_qa(self.kind, &self.doc_titles, context, query),
                Some(existing) => {
                    render_refine(self.kind, &self.doc_titles, context, query, existing)
                }
            };

            let raw = llm_deadline(self.timeout, self.llm.complete(&prompt)).await?;
            match parse_structured(&raw) {
                Some(parsed) if parsed.query_satisfied && !parsed.answer.trim().is_empty() => {
                    answer = Some(parsed.answer.trim().to_string());
                }
                _ => {
                    debug!(pass, kind = ?self.kind, "Synthesis pass discarded");
                }
            }
        }

        Ok(answer.unwrap_or_else(|| NO_ANSWER.to_string()))
    }
}

/// Pack chunks into separator-joined batches no longer than `budget`
/// characters. A chunk longer than the budget forms its own batch.
pub fn pack_chunks(chunks: &[String], budget: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for chunk in chunks.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        let needed = if current.is_empty() {
            chunk.len()
        } else {
            current.len() + CHUNK_SEPARATOR.len() + chunk.len()
        };
        if needed > budget && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(CHUNK_SEPARATOR);
        }
        current.push_str(chunk);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Parse a structured answer, tolerating code fences and surrounding prose.
/// Plain text is taken as a satisfied answer.
fn parse_structured(raw: &str) -> Option<StructuredAnswer> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = serde_json::from_str::<StructuredAnswer>(text) {
        return Some(parsed);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<StructuredAnswer>(&text[start..=end]) {
                return Some(parsed);
            }
        }
    }
    Some(StructuredAnswer {
        answer: text.to_string(),
        query_satisfied: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::llm::{ChatResponse, MockChatModel};
    use std::sync::Mutex;

    fn scripted(replies: Vec<&'static str>) -> Arc<MockChatModel> {
        let replies = Mutex::new(replies.into_iter());
        Arc::new(MockChatModel::new(move |_, _| {
            let next = replies.lock().unwrap().next().unwrap_or("");
            Ok(ChatResponse::Content(next.to_string()))
        }))
    }

    fn chunks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk {} {}", i, "x".repeat(40))).collect()
    }

    #[test]
    fn test_pack_respects_budget() {
        let batches = pack_chunks(&chunks(5), 100);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 100));

        let single = pack_chunks(&["y".repeat(250)], 100);
        assert_eq!(single.len(), 1);
        assert!(pack_chunks(&[String::from("  ")], 100).is_empty());
    }

    #[test]
    fn test_parse_structured_variants() {
        let fenced = parse_structured("```json\n{\"answer\": \"A\", \"query_satisfied\": false}\n```").unwrap();
        assert_eq!(fenced.answer, "A");
        assert!(!fenced.query_satisfied);

        let prose = parse_structured("Sure: {\"answer\": \"B\"} hope it helps").unwrap();
        assert_eq!(prose.answer, "B");
        assert!(prose.query_satisfied);

        let plain = parse_structured("Just text").unwrap();
        assert_eq!(plain.answer, "Just text");
        assert!(parse_structured("   ").is_none());
    }

    #[tokio::test]
    async fn test_unhelpful_refine_keeps_answer() {
        let llm = scripted(vec![
            r#"{"answer": "Revenue was $10B.", "query_satisfied": true}"#,
            r#"{"answer": "Unrelated", "query_satisfied": false}"#,
        ]);
        let synth = Synthesizer::new(llm.clone(), SynthesisKind::Financial, "- A", Duration::from_secs(5))
            .with_context_budget(100);

        let answer = synth.synthesize("What was revenue?", &chunks(3)).await.unwrap();
        assert_eq!(answer, "Revenue was $10B.");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_first_useful_pass_then_refine() {
        let llm = scripted(vec![
            r#"{"answer": "", "query_satisfied": false}"#,
            r#"{"answer": "Grade A: use statins.", "query_satisfied": true}"#,
        ]);
        let synth = Synthesizer::new(llm, SynthesisKind::Clinical, "- G", Duration::from_secs(5))
            .with_context_budget(100);
        let answer = synth.synthesize("Statins?", &chunks(3)).await.unwrap();
        assert_eq!(answer, "Grade A: use statins.");
    }

    #[tokio::test]
    async fn test_no_useful_pass_is_soft_answer() {
        let llm = scripted(vec![r#"{"answer": "n/a", "query_satisfied": false}"#]);
        let synth = Synthesizer::new(llm.clone(), SynthesisKind::General, "- D", Duration::from_secs(5));
        assert_eq!(synth.synthesize("q", &chunks(1)).await.unwrap(), NO_ANSWER);

        // No context at all never calls the model
        assert_eq!(synth.synthesize("q", &[]).await.unwrap(), NO_ANSWER);
        assert_eq!(llm.call_count(), 1);
    }
}
