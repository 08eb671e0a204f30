//! Question routing
//!
//! A `QuestionRouter` decomposes a query into sub-questions, each addressed
//! to one tool. Routing quality is best effort: a poor split degrades the
//! answer but never fails the query.

use crate::composer::{QueryEngineTool, ToolMetadata};
use crate::sub_question::SubQuestionQueryEngine;
use crate::synthesizer::Synthesizer;
use crate::templates::{render, SUB_QUESTION_PROMPT};
use async_trait::async_trait;
use docchat_common::errors::Result;
use docchat_common::llm::{strip_code_fences, ChatModel};
use docchat_common::timeout::llm_deadline;
use docchat_index::ToolGroup;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    #[serde(rename = "sub_question")]
    pub question: String,
    pub tool_name: String,
}

#[async_trait]
pub trait QuestionRouter: Send + Sync {
    async fn generate(&self, query: &str, tools: &[ToolMetadata]) -> Result<Vec<SubQuestion>>;
}

/// Asks the tool model for a JSON list of sub-questions
pub struct LlmQuestionRouter {
    llm: Arc<dyn ChatModel>,
    timeout: Duration,
    fallback: DescriptionMatchRouter,
}

impl LlmQuestionRouter {
    pub fn new(llm: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self {
            llm,
            timeout,
            fallback: DescriptionMatchRouter,
        }
    }

    fn prompt(query: &str, tools: &[ToolMetadata]) -> String {
        let listing = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n");
        render(SUB_QUESTION_PROMPT, &[("tools", &listing), ("query_str", query)])
    }
}

#[async_trait]
impl QuestionRouter for LlmQuestionRouter {
    async fn generate(&self, query: &str, tools: &[ToolMetadata]) -> Result<Vec<SubQuestion>> {
        if tools.is_empty() {
            return Ok(Vec::new());
        }

        let raw = llm_deadline(self.timeout, self.llm.complete(&Self::prompt(query, tools))).await?;
        match parse_sub_questions(&raw) {
            Some(questions) if !questions.is_empty() => Ok(questions),
            _ => {
                warn!(response = %raw, "Unusable sub-question output, routing by description");
                self.fallback.generate(query, tools).await
            }
        }
    }
}

fn parse_sub_questions(raw: &str) -> Option<Vec<SubQuestion>> {
    let text = strip_code_fences(raw);
    if let Ok(questions) = serde_json::from_str::<Vec<SubQuestion>>(text) {
        return Some(questions);
    }
    let (start, end) = (text.find('[')?, text.rfind(']')?);
    if start >= end {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

const STOPWORDS: &[&str] = &[
    "about", "and", "any", "are", "can", "did", "does", "for", "from", "has", "have", "how",
    "the", "that", "their", "there", "this", "what", "when", "where", "which", "who", "why",
    "with", "was", "were", "will", "into", "should", "asked", "here", "questions", "question",
    "query", "engine", "answer", "set", "user", "conversation", "documents", "document",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Deterministic router: each query term found in a tool description scores
/// a point. The query goes unchanged to every top-scoring tool, or to all
/// tools when nothing matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptionMatchRouter;

impl DescriptionMatchRouter {
    pub fn route(&self, query: &str, tools: &[ToolMetadata]) -> Vec<SubQuestion> {
        let query_terms = terms(query);
        let scores: Vec<usize> = tools
            .iter()
            .map(|tool| {
                let description = terms(&format!("{} {}", tool.name, tool.description));
                query_terms.intersection(&description).count()
            })
            .collect();
        let best = scores.iter().copied().max().unwrap_or(0);

        tools
            .iter()
            .zip(scores)
            .filter(|(_, score)| best == 0 || *score == best)
            .map(|(tool, _)| SubQuestion {
                question: query.to_string(),
                tool_name: tool.name.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl QuestionRouter for DescriptionMatchRouter {
    async fn generate(&self, query: &str, tools: &[ToolMetadata]) -> Result<Vec<SubQuestion>> {
        Ok(self.route(query, tools))
    }
}

/// Builds the synthesizer that aggregates a group's sub-answers
pub type GroupSynthesizerFactory<'a> = dyn Fn(ToolGroup) -> Synthesizer + 'a;

/// Wrap each non-empty group of document tools in a sub-question engine and
/// expose it as a top-level tool. Output follows group priority order.
pub fn build_router(
    tools_by_group: BTreeMap<ToolGroup, Vec<QueryEngineTool>>,
    router: Arc<dyn QuestionRouter>,
    synthesizer_for: &GroupSynthesizerFactory<'_>,
    verbose: bool,
) -> Vec<QueryEngineTool> {
    ToolGroup::PRIORITY
        .into_iter()
        .filter_map(|group| {
            let tools = tools_by_group.get(&group).filter(|tools| !tools.is_empty())?;
            debug!(group = %group, tools = tools.len(), "Exposing tool group");
            let engine = SubQuestionQueryEngine::new(
                group,
                tools.clone(),
                router.clone(),
                synthesizer_for(group),
                verbose,
            );
            Some(QueryEngineTool::new(
                ToolMetadata::new(group.tool_name(), group.description()),
                Arc::new(engine),
            ))
        })
        .collect()
}
