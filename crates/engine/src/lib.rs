//! DocChat query engines
//!
//! Provides:
//! - Per-document retrieval and compact-and-refine synthesis
//! - Sub-question routing over category tool groups
//! - The tool-calling chat agent and its per-conversation assembly

pub mod agent;
pub mod assembler;
pub mod composer;
pub mod history;
pub mod retriever;
pub mod router;
pub mod sub_question;
pub mod synthesizer;
pub mod templates;

pub use agent::{AgentEvent, AgentResponse, AgentStream, ChatAgent, DEFAULT_MAX_FUNCTION_CALLS};
pub use assembler::{build_system_prompt, ChatEngineFactory, EngineSettings};
pub use composer::{
    document_tool, make_query_engine, ComposerSettings, QueryEngine, QueryEngineTool,
    QueryResponse, RetrieverQueryEngine, ToolMetadata,
};
pub use history::get_chat_history;
pub use retriever::VectorIndexRetriever;
pub use router::{build_router, DescriptionMatchRouter, LlmQuestionRouter, QuestionRouter, SubQuestion};
pub use sub_question::SubQuestionQueryEngine;
pub use synthesizer::Synthesizer;
