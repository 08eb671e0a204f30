//! Per-document query engines
//!
//! Composes a retriever scoped to one document with a synthesizer whose
//! prompting matches the document's category, and wraps the result as a
//! named tool.

use crate::retriever::VectorIndexRetriever;
use crate::synthesizer::{Synthesizer, DEFAULT_CONTEXT_BUDGET};
use crate::templates::format_doc_titles;
use async_trait::async_trait;
use docchat_common::conversations::{Citation, QuestionAnswerPair};
use docchat_common::documents::{
    build_description_for_document, build_title_for_document, Document,
};
use docchat_common::errors::Result;
use docchat_common::llm::{ChatModel, ToolSchema};
use docchat_index::{CategoryProfile, DocumentIndex, NodeWithScore, SynthesisKind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Answer produced by a query engine
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<NodeWithScore>,
    /// Sub-question answers when the engine routed the query
    pub qa_pairs: Vec<QuestionAnswerPair>,
}

impl QueryResponse {
    pub fn citations(&self) -> Vec<Citation> {
        self.source_nodes.iter().map(citation_for).collect()
    }
}

pub fn citation_for(node: &NodeWithScore) -> Citation {
    Citation {
        document_id: node.node.doc_id,
        text: node.node.text.clone(),
        page_number: node.node.page_number(),
        score: Some(node.score),
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, query: &str) -> Result<QueryResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Function-calling schema taking a single `input` string
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "A full, self-contained question for this tool"
                    }
                },
                "required": ["input"]
            }),
        }
    }
}

/// A query engine exposed under a name and description
#[derive(Clone)]
pub struct QueryEngineTool {
    pub metadata: ToolMetadata,
    pub engine: Arc<dyn QueryEngine>,
}

impl QueryEngineTool {
    pub fn new(metadata: ToolMetadata, engine: Arc<dyn QueryEngine>) -> Self {
        Self { metadata, engine }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Retrieve, then synthesize
pub struct RetrieverQueryEngine {
    retriever: VectorIndexRetriever,
    synthesizer: Synthesizer,
}

impl RetrieverQueryEngine {
    pub fn new(retriever: VectorIndexRetriever, synthesizer: Synthesizer) -> Self {
        Self {
            retriever,
            synthesizer,
        }
    }

    pub fn retriever(&self) -> &VectorIndexRetriever {
        &self.retriever
    }

    pub fn synthesis_kind(&self) -> SynthesisKind {
        self.synthesizer.kind()
    }
}

#[async_trait]
impl QueryEngine for RetrieverQueryEngine {
    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let nodes = self.retriever.retrieve(query).await?;
        let texts: Vec<String> = nodes.iter().map(|n| n.node.text.clone()).collect();
        let response = self.synthesizer.synthesize(query, &texts).await?;

        Ok(QueryResponse {
            response,
            source_nodes: nodes,
            qa_pairs: Vec::new(),
        })
    }
}

/// Timeouts and budgets shared by composed engines
#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub llm_timeout: Duration,
    pub embedding_timeout: Duration,
    pub context_budget: usize,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(60),
            embedding_timeout: Duration::from_secs(30),
            context_budget: DEFAULT_CONTEXT_BUDGET,
        }
    }
}

/// Build the query engine for one document.
///
/// Clinical synthesis is scoped to the guideline's own title; every other
/// style is scoped to the titles of the whole conversation document set.
pub fn make_query_engine(
    document: &Document,
    index: DocumentIndex,
    all_documents: &[Document],
    profile: &CategoryProfile,
    kind: SynthesisKind,
    llm: Arc<dyn ChatModel>,
    settings: &ComposerSettings,
) -> RetrieverQueryEngine {
    let titles: Vec<String> = match kind {
        SynthesisKind::Clinical => vec![build_title_for_document(document)],
        _ => all_documents.iter().map(build_title_for_document).collect(),
    };

    let retriever =
        VectorIndexRetriever::new(index, profile.similarity_top_k, settings.embedding_timeout);
    let synthesizer = Synthesizer::new(llm, kind, format_doc_titles(&titles), settings.llm_timeout)
        .with_context_budget(settings.context_budget);

    RetrieverQueryEngine::new(retriever, synthesizer)
}

/// Per-document tool, named by the document id
pub fn document_tool(document: &Document, engine: Arc<dyn QueryEngine>) -> QueryEngineTool {
    QueryEngineTool::new(
        ToolMetadata::new(document.id.to_string(), build_description_for_document(document)),
        engine,
    )
}
