//! DocChat Common Library
//!
//! Shared code for the DocChat crates including:
//! - Document, conversation and message domain types
//! - Database models, the persistence contract and its repository
//! - Embedding and chat model client abstractions
//! - Object storage abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics

pub mod config;
pub mod conversations;
pub mod db;
pub mod documents;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod storage;
pub mod timeout;

// Re-export commonly used types
pub use config::AppConfig;
pub use conversations::{Conversation, Message};
pub use db::{DocumentStore, Repository};
pub use documents::{Document, DocumentCategory};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;
pub use storage::ObjectStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
