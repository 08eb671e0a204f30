//! Sub-question query engine
//!
//! Splits a query into sub-questions over a group of document tools, runs
//! them concurrently and aggregates the answers. One failing sub-question
//! never fails the whole query.

use crate::composer::{QueryEngine, QueryEngineTool, QueryResponse, ToolMetadata};
use crate::router::{QuestionRouter, SubQuestion};
use crate::synthesizer::Synthesizer;
use crate::templates::NO_ANSWER;
use async_trait::async_trait;
use docchat_common::conversations::QuestionAnswerPair;
use docchat_common::errors::Result;
use docchat_common::metrics::record_sub_questions;
use docchat_index::ToolGroup;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct SubQuestionQueryEngine {
    group: ToolGroup,
    tools: HashMap<String, QueryEngineTool>,
    metadata: Vec<ToolMetadata>,
    router: Arc<dyn QuestionRouter>,
    synthesizer: Synthesizer,
    verbose: bool,
}

impl SubQuestionQueryEngine {
    pub fn new(
        group: ToolGroup,
        tools: Vec<QueryEngineTool>,
        router: Arc<dyn QuestionRouter>,
        synthesizer: Synthesizer,
        verbose: bool,
    ) -> Self {
        let metadata = tools.iter().map(|t| t.metadata.clone()).collect();
        let tools = tools.into_iter().map(|t| (t.metadata.name.clone(), t)).collect();
        Self {
            group,
            tools,
            metadata,
            router,
            synthesizer,
            verbose,
        }
    }

    pub fn group(&self) -> ToolGroup {
        self.group
    }

    async fn answer(&self, sub_question: &SubQuestion) -> Option<QueryResponse> {
        let Some(tool) = self.tools.get(&sub_question.tool_name) else {
            warn!(group = %self.group, tool = %sub_question.tool_name, "Sub-question names unknown tool");
            return None;
        };

        match tool.engine.query(&sub_question.question).await {
            Ok(response) => {
                if self.verbose {
                    info!(
                        group = %self.group,
                        tool = %sub_question.tool_name,
                        question = %sub_question.question,
                        answer = %response.response,
                        "Sub-question answered"
                    );
                }
                Some(response)
            }
            Err(e) => {
                warn!(
                    group = %self.group,
                    tool = %sub_question.tool_name,
                    error = %e,
                    "Sub-question failed"
                );
                None
            }
        }
    }
}

#[async_trait]
impl QueryEngine for SubQuestionQueryEngine {
    #[instrument(skip(self), fields(group = %self.group))]
    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let sub_questions = self.router.generate(query, &self.metadata).await?;
        record_sub_questions(self.group.tool_name(), sub_questions.len());

        let answers = join_all(sub_questions.iter().map(|sq| self.answer(sq))).await;

        let mut qa_pairs = Vec::new();
        let mut source_nodes = Vec::new();
        let mut contexts = Vec::new();
        for (sub_question, answer) in sub_questions.iter().zip(answers) {
            let Some(answer) = answer else { continue };
            contexts.push(format!(
                "Sub question: {}\nResponse: {}",
                sub_question.question, answer.response
            ));
            qa_pairs.push(QuestionAnswerPair {
                question: sub_question.question.clone(),
                answer: Some(answer.response.clone()),
                citations: answer.citations(),
            });
            source_nodes.extend(answer.source_nodes);
        }

        if contexts.is_empty() {
            return Ok(QueryResponse {
                response: NO_ANSWER.to_string(),
                source_nodes,
                qa_pairs,
            });
        }

        let response = self.synthesizer.synthesize(query, &contexts).await?;
        Ok(QueryResponse {
            response,
            source_nodes,
            qa_pairs,
        })
    }
}
