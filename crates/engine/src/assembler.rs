//! Chat session assembly
//!
//! Turns a conversation into a ready agent: load or build every document
//! index, compose per-document engines, group them behind sub-question
//! routers and attach history plus a system prompt.

use crate::agent::{ChatAgent, DEFAULT_MAX_FUNCTION_CALLS};
use crate::composer::{document_tool, make_query_engine, ComposerSettings, QueryEngineTool};
use crate::history::get_chat_history;
use crate::router::{build_router, QuestionRouter};
use crate::synthesizer::{Synthesizer, DEFAULT_CONTEXT_BUDGET};
use crate::templates::{
    format_doc_titles, render, CLINICAL_SYSTEM_MESSAGE, GENERAL_SYSTEM_MESSAGE, SYSTEM_MESSAGE,
};
use chrono::{NaiveDate, Utc};
use docchat_common::config::AppConfig;
use docchat_common::conversations::Conversation;
use docchat_common::documents::{build_title_for_document, Document, DocumentCategory};
use docchat_common::errors::Result;
use docchat_common::llm::ChatModel;
use docchat_common::storage::ObjectStore;
use docchat_index::{IndexBuilder, SynthesisKind, ToolGroup};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Engine-wide limits
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_function_calls: usize,
    pub llm_timeout: Duration,
    pub embedding_timeout: Duration,
    pub context_budget: usize,
    pub verbose: bool,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_function_calls: config.llm.max_function_calls,
            llm_timeout: config.llm_timeout(),
            embedding_timeout: config.embedding_timeout(),
            context_budget: DEFAULT_CONTEXT_BUDGET,
            verbose: config.verbose,
        }
    }

    fn composer(&self) -> ComposerSettings {
        ComposerSettings {
            llm_timeout: self.llm_timeout,
            embedding_timeout: self.embedding_timeout,
            context_budget: self.context_budget,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let composer = ComposerSettings::default();
        Self {
            max_function_calls: DEFAULT_MAX_FUNCTION_CALLS,
            llm_timeout: composer.llm_timeout,
            embedding_timeout: composer.embedding_timeout,
            context_budget: composer.context_budget,
            verbose: false,
        }
    }
}

/// Builds chat agents for conversations.
///
/// The index builder, and through it the storage context cache and vector
/// store registry, is shared across every conversation.
pub struct ChatEngineFactory {
    builder: Arc<IndexBuilder>,
    fs: Arc<dyn ObjectStore>,
    chat_llm: Arc<dyn ChatModel>,
    tool_llm: Arc<dyn ChatModel>,
    router: Arc<dyn QuestionRouter>,
    settings: EngineSettings,
}

impl ChatEngineFactory {
    pub fn new(
        builder: Arc<IndexBuilder>,
        fs: Arc<dyn ObjectStore>,
        chat_llm: Arc<dyn ChatModel>,
        tool_llm: Arc<dyn ChatModel>,
        router: Arc<dyn QuestionRouter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            builder,
            fs,
            chat_llm,
            tool_llm,
            router,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[instrument(skip(self, conversation), fields(conversation_id = %conversation.id, documents = conversation.documents.len()))]
    pub async fn get_chat_engine(&self, conversation: &Conversation) -> Result<ChatAgent> {
        let documents = &conversation.documents;
        let index_map = self
            .builder
            .build_index_map(documents, self.fs.clone())
            .await?;

        for failure in &index_map.failures {
            warn!(
                document_id = %failure.document_id,
                error = %failure.error,
                "Document unavailable for this conversation"
            );
        }

        let composer = self.settings.composer();
        let mut tools_by_group: BTreeMap<ToolGroup, Vec<QueryEngineTool>> = BTreeMap::new();
        for document in documents {
            let Some(index) = index_map.get(&document.id) else {
                continue;
            };
            let profile = self.builder.profiles().get(document.category());
            for (group, kind) in &profile.tool_groups {
                let engine = make_query_engine(
                    document,
                    index.clone(),
                    documents,
                    profile,
                    *kind,
                    self.tool_llm.clone(),
                    &composer,
                );
                tools_by_group
                    .entry(*group)
                    .or_default()
                    .push(document_tool(document, Arc::new(engine)));
            }
        }

        let titles: Vec<String> = documents.iter().map(build_title_for_document).collect();
        let doc_titles = format_doc_titles(&titles);
        let synthesizer_for = |group: ToolGroup| {
            Synthesizer::new(
                self.tool_llm.clone(),
                aggregate_kind(group),
                doc_titles.clone(),
                self.settings.llm_timeout,
            )
            .with_context_budget(self.settings.context_budget)
        };
        let tools = build_router(
            tools_by_group,
            self.router.clone(),
            &synthesizer_for,
            self.settings.verbose,
        );

        let history = get_chat_history(&conversation.messages);
        let system_prompt = build_system_prompt(documents, Utc::now().date_naive());

        info!(
            tools = tools.len(),
            history = history.len(),
            degraded = index_map.failures.len(),
            "Chat engine ready"
        );

        Ok(ChatAgent::new(self.chat_llm.clone(), tools, history, system_prompt)
            .with_max_function_calls(self.settings.max_function_calls)
            .with_degraded_documents(index_map.failed_ids())
            .with_llm_timeout(self.settings.llm_timeout))
    }
}

/// Synthesis style used when a group merges its sub-answers
fn aggregate_kind(group: ToolGroup) -> SynthesisKind {
    match group {
        ToolGroup::ClinicalGuidelines => SynthesisKind::Clinical,
        ToolGroup::QuantitativeFinancial => SynthesisKind::Quantitative,
        ToolGroup::QualitativeFinancial => SynthesisKind::Financial,
        ToolGroup::General => SynthesisKind::General,
    }
}

/// System prompt listing every selected document and the current date.
///
/// Any SEC filing, or an empty selection, gets the financial analyst prompt.
/// A guideline-only selection gets the clinical prompt; anything else the
/// general one.
pub fn build_system_prompt(documents: &[Document], today: NaiveDate) -> String {
    let has = |category: DocumentCategory| documents.iter().any(|d| d.category() == category);
    let template = if documents.is_empty() || has(DocumentCategory::SecFiling) {
        SYSTEM_MESSAGE
    } else if !has(DocumentCategory::General) {
        CLINICAL_SYSTEM_MESSAGE
    } else {
        GENERAL_SYSTEM_MESSAGE
    };

    let titles: Vec<String> = documents.iter().map(build_title_for_document).collect();
    render(
        template,
        &[
            ("doc_titles", &format_doc_titles(&titles)),
            ("curr_date", &today.format("%Y-%m-%d").to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::DescriptionMatchRouter;
    use crate::templates::NO_DOCUMENTS_SELECTED;
    use async_trait::async_trait;
    use docchat_common::conversations::SubProcessSource;
    use docchat_common::embeddings::MockEmbedder;
    use docchat_common::errors::AppError;
    use docchat_common::llm::{ChatResponse, ChatRole, MockChatModel, ToolCall};
    use docchat_common::storage::MemoryObjectStore;
    use docchat_index::{
        CategoryProfiles, ContentFetcher, EmbedderSet, InMemoryVectorStore, StorageContextCache,
        VectorStoreRegistry,
    };
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;

    struct StaticFetcher(HashMap<String, String>);

    #[async_trait]
    impl ContentFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.0
                .get(url)
                .map(|body| body.as_bytes().to_vec())
                .ok_or_else(|| AppError::ContentFetch {
                    url: url.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    fn metadata(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn filing() -> Document {
        Document::new(
            "uber-10k.txt",
            metadata(json!({"sec_document": {
                "company_name": "Uber Technologies",
                "company_ticker": "UBER",
                "doc_type": "10-K",
                "year": 2023
            }})),
        )
    }

    fn guideline() -> Document {
        Document::new(
            "htn.txt",
            metadata(json!({"clinical_guideline": {
                "title": "Hypertension in adults",
                "issuing_organization": "NICE",
                "publication_date": "2019-08-28"
            }})),
        )
    }

    fn factory(bodies: &[(&str, &str)], chat_llm: Arc<MockChatModel>) -> ChatEngineFactory {
        let profiles = CategoryProfiles::default();
        let fetcher = StaticFetcher(
            bodies
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        );
        let builder = IndexBuilder::new(
            Arc::new(VectorStoreRegistry::with_store(Arc::new(InMemoryVectorStore::new()))),
            Arc::new(StorageContextCache::default()),
            Arc::new(fetcher),
            EmbedderSet::uniform(Arc::new(MockEmbedder::new(64)), &profiles),
            profiles,
            "index",
        )
        .unwrap();

        ChatEngineFactory::new(
            Arc::new(builder),
            Arc::new(MemoryObjectStore::new()),
            chat_llm,
            Arc::new(MockChatModel::constant(
                r#"{"answer": "Found it.", "query_satisfied": true}"#,
            )),
            Arc::new(DescriptionMatchRouter),
            EngineSettings::default(),
        )
    }

    const FILING_TEXT: &str = "Risk factors: regulatory headwinds may affect our mobility business. \
                               Revenue grew 17% to $37.3 billion in 2023.";
    const GUIDELINE_TEXT: &str = "Offer lifestyle advice to adults with hypertension. \
                                  Grade A. Strong recommendation for ACE inhibitors in adults under 55.";

    #[tokio::test]
    async fn test_end_to_end_turn() {
        let chat_llm = Arc::new(MockChatModel::new(|messages, _| {
            let results: Vec<&str> = messages
                .iter()
                .filter(|m| m.role == ChatRole::Tool)
                .map(|m| m.text())
                .collect();
            if results.is_empty() {
                return Ok(ChatResponse::ToolCalls(vec![
                    ToolCall {
                        id: "1".into(),
                        name: "qualitative_question_engine".into(),
                        arguments: r#"{"input": "What risks does Uber describe?"}"#.into(),
                    },
                    ToolCall {
                        id: "2".into(),
                        name: "clinical_guideline_engine".into(),
                        arguments: r#"{"input": "What is recommended for hypertension?"}"#.into(),
                    },
                ]));
            }
            Ok(ChatResponse::Content(results.join(" | ")))
        }));
        let factory = factory(
            &[("uber-10k.txt", FILING_TEXT), ("htn.txt", GUIDELINE_TEXT)],
            chat_llm,
        );
        let conversation = Conversation::new(vec![filing(), guideline()]);

        let mut agent = factory.get_chat_engine(&conversation).await.unwrap();
        assert_eq!(
            agent.tool_names(),
            vec![
                "clinical_guideline_engine",
                "quantitative_question_engine",
                "qualitative_question_engine"
            ]
        );
        assert!(agent.degraded_documents().is_empty());
        assert!(agent.system_prompt().contains("Uber Technologies (UBER) 10-K (2023)"));
        assert!(agent.system_prompt().contains("Hypertension in adults-NICE"));

        let response = agent.chat("Compare the risks and the guidance").await.unwrap();
        assert_eq!(response.content, "Found it. | Found it.");
        assert_eq!(response.rounds, 1);

        let pairs: Vec<_> = response
            .sub_processes
            .iter()
            .filter(|s| s.source == SubProcessSource::SubQuestion)
            .filter_map(|s| s.question_answer_pair())
            .collect();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| !p.citations.is_empty()));
        assert!(pairs[0]
            .citations
            .iter()
            .all(|c| c.document_id == conversation.documents[1].id));
    }

    #[tokio::test]
    async fn test_failed_document_is_degraded_not_fatal() {
        let factory = factory(&[("htn.txt", GUIDELINE_TEXT)], Arc::new(MockChatModel::constant("ok")));
        let conversation = Conversation::new(vec![filing(), guideline()]);

        let agent = factory.get_chat_engine(&conversation).await.unwrap();
        assert_eq!(agent.degraded_documents(), &[conversation.documents[0].id]);
        assert_eq!(agent.tool_names(), vec!["clinical_guideline_engine"]);
        // Still listed to the model
        assert!(agent.system_prompt().contains("UBER"));
    }

    #[tokio::test]
    async fn test_empty_conversation() {
        let factory = factory(&[], Arc::new(MockChatModel::constant("Please select a document.")));
        let mut agent = factory
            .get_chat_engine(&Conversation::new(Vec::new()))
            .await
            .unwrap();

        assert!(agent.tools().is_empty());
        assert!(agent.system_prompt().contains(NO_DOCUMENTS_SELECTED));
        let response = agent.chat("hi").await.unwrap();
        assert_eq!(response.rounds, 0);
        assert_eq!(response.content, "Please select a document.");
    }

    #[test]
    fn test_system_prompt_selection() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let clinical = build_system_prompt(&[guideline()], today);
        assert!(clinical.starts_with("You are an expert medical guidelines interpreter"));
        assert!(clinical.contains("The current date is: 2024-03-01"));

        let mixed = build_system_prompt(&[guideline(), filing()], today);
        assert!(mixed.starts_with("You are an expert financial analyst"));

        let general = build_system_prompt(&[Document::new("notes.txt", Map::new())], today);
        assert!(general.contains("- Untitled document"));
        assert!(general.starts_with("You are a careful research assistant"));
    }
}
