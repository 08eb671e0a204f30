//! Conversation, message and sub-process types

use crate::documents::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl From<String> for MessageRole {
    fn from(s: String) -> Self {
        match s.as_str() {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

impl From<MessageRole> for String {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => "user".to_string(),
            MessageRole::Assistant => "assistant".to_string(),
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Success,
    Error,
}

impl From<String> for MessageStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => MessageStatus::Pending,
            "success" => MessageStatus::Success,
            _ => MessageStatus::Error,
        }
    }
}

impl From<MessageStatus> for String {
    fn from(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Pending => "pending".to_string(),
            MessageStatus::Success => "success".to_string(),
            MessageStatus::Error => "error".to_string(),
        }
    }
}

/// Which stage of answering produced a sub-process record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubProcessSource {
    Chunking,
    NodeParsing,
    Embedding,
    Llm,
    Query,
    Retrieve,
    Synthesize,
    Tree,
    SubQuestion,
    Templating,
    FunctionCall,
    Reranking,
    Exception,
    AgentStep,
}

impl SubProcessSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubProcessSource::Chunking => "chunking",
            SubProcessSource::NodeParsing => "node_parsing",
            SubProcessSource::Embedding => "embedding",
            SubProcessSource::Llm => "llm",
            SubProcessSource::Query => "query",
            SubProcessSource::Retrieve => "retrieve",
            SubProcessSource::Synthesize => "synthesize",
            SubProcessSource::Tree => "tree",
            SubProcessSource::SubQuestion => "sub_question",
            SubProcessSource::Templating => "templating",
            SubProcessSource::FunctionCall => "function_call",
            SubProcessSource::Reranking => "reranking",
            SubProcessSource::Exception => "exception",
            SubProcessSource::AgentStep => "agent_step",
        }
    }

    fn from_str_lossy(s: &str) -> Self {
        match s {
            "chunking" => SubProcessSource::Chunking,
            "node_parsing" => SubProcessSource::NodeParsing,
            "embedding" => SubProcessSource::Embedding,
            "llm" => SubProcessSource::Llm,
            "query" => SubProcessSource::Query,
            "retrieve" => SubProcessSource::Retrieve,
            "synthesize" => SubProcessSource::Synthesize,
            "tree" => SubProcessSource::Tree,
            "sub_question" => SubProcessSource::SubQuestion,
            "templating" => SubProcessSource::Templating,
            "function_call" => SubProcessSource::FunctionCall,
            "reranking" => SubProcessSource::Reranking,
            "agent_step" => SubProcessSource::AgentStep,
            _ => SubProcessSource::Exception,
        }
    }
}

impl From<String> for SubProcessSource {
    fn from(s: String) -> Self {
        SubProcessSource::from_str_lossy(&s)
    }
}

impl From<SubProcessSource> for String {
    fn from(source: SubProcessSource) -> Self {
        source.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubProcessStatus {
    Pending,
    Finished,
}

impl From<String> for SubProcessStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "finished" => SubProcessStatus::Finished,
            _ => SubProcessStatus::Pending,
        }
    }
}

impl From<SubProcessStatus> for String {
    fn from(status: SubProcessStatus) -> Self {
        match status {
            SubProcessStatus::Pending => "pending".to_string(),
            SubProcessStatus::Finished => "finished".to_string(),
        }
    }
}

/// A retrieved passage backing part of an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: Uuid,
    pub text: String,
    pub page_number: u32,
    pub score: Option<f32>,
}

/// A routed sub-question with its answer and supporting citations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswerPair {
    pub question: String,
    pub answer: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Metadata key holding a serialized `QuestionAnswerPair`
pub const SUB_QUESTION_METADATA_KEY: &str = "sub_question";

/// Trace record of one stage of answering a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSubProcess {
    pub id: Uuid,
    pub message_id: Option<Uuid>,
    pub source: SubProcessSource,
    pub status: SubProcessStatus,
    #[serde(default)]
    pub metadata_map: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MessageSubProcess {
    /// A finished sub-process not yet attached to a stored message
    pub fn finished(source: SubProcessSource, metadata_map: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id: None,
            source,
            status: SubProcessStatus::Finished,
            metadata_map,
            created_at: Utc::now(),
        }
    }

    /// Sub-question trace carrying a question/answer pair
    pub fn sub_question(pair: &QuestionAnswerPair) -> Self {
        let mut metadata_map = Map::new();
        if let Ok(value) = serde_json::to_value(pair) {
            metadata_map.insert(SUB_QUESTION_METADATA_KEY.to_string(), value);
        }
        Self::finished(SubProcessSource::SubQuestion, metadata_map)
    }

    /// Question/answer pair stored on a sub-question trace
    pub fn question_answer_pair(&self) -> Option<QuestionAnswerPair> {
        self.metadata_map
            .get(SUB_QUESTION_METADATA_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sub_processes: Vec<MessageSubProcess>,
}

/// A conversation with its selected documents (in selection order) and messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub documents: Vec<Document>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// New, empty conversation over the given documents
    pub fn new(documents: Vec<Document>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            documents,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
