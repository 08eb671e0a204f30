//! Error types for DocChat
//!
//! Provides a single error type shared by every crate with:
//! - Distinct variants for each failure mode
//! - Machine-readable error codes
//! - Not-found / transient classification used for local recovery
//! - HTTP status mapping for whatever surface embeds the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidFormat,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,
    ConversationNotFound,
    MessageNotFound,
    IndexNotFound,
    ObjectNotFound,

    // Index errors (5xxx)
    CorruptIndex,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTimeout,
    LlmError,
    LlmTimeout,
    ContentFetchError,
    StorageError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    DocumentParseError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,
            ErrorCode::ConversationNotFound => 4003,
            ErrorCode::MessageNotFound => 4004,
            ErrorCode::IndexNotFound => 4005,
            ErrorCode::ObjectNotFound => 4006,

            ErrorCode::CorruptIndex => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,
            ErrorCode::LlmError => 8004,
            ErrorCode::LlmTimeout => 8005,
            ErrorCode::ContentFetchError => 8006,
            ErrorCode::StorageError => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::DocumentParseError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Message not found: {id}")]
    MessageNotFound { id: String },

    #[error("No persisted index for document {doc_id}")]
    IndexNotFound { doc_id: String },

    #[error("Object not found: {path}")]
    ObjectNotFound { path: String },

    // Index errors
    #[error("Persisted index for document {doc_id} is unusable: {reason}")]
    CorruptIndex { doc_id: String, reason: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Vector store query error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("LLM service error: {message}")]
    LlmError { message: String },

    #[error("LLM timeout after {timeout_ms}ms")]
    LlmTimeout { timeout_ms: u64 },

    #[error("Failed to fetch content from {url}: {message}")]
    ContentFetch { url: String, message: String },

    #[error("Object storage error: {message}")]
    Storage { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Failed to parse document {doc_id}: {message}")]
    DocumentParse { doc_id: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::ConversationNotFound { .. } => ErrorCode::ConversationNotFound,
            AppError::MessageNotFound { .. } => ErrorCode::MessageNotFound,
            AppError::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            AppError::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            AppError::CorruptIndex { .. } => ErrorCode::CorruptIndex,
            AppError::Database(_) | AppError::Sqlx(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::LlmTimeout { .. } => ErrorCode::LlmTimeout,
            AppError::ContentFetch { .. } => ErrorCode::ContentFetchError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::DocumentParse { .. } => ErrorCode::DocumentParseError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the error means "this thing does not exist (yet)"
    ///
    /// Index and object misses are recovered locally by building; document
    /// and conversation misses propagate to the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NotFound { .. }
                | AppError::DocumentNotFound { .. }
                | AppError::ConversationNotFound { .. }
                | AppError::MessageNotFound { .. }
                | AppError::IndexNotFound { .. }
                | AppError::ObjectNotFound { .. }
        )
    }

    /// Whether the error came from a provider or transport and may succeed
    /// if the same request is issued later. Nothing in the core retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingError { .. }
                | AppError::EmbeddingTimeout { .. }
                | AppError::LlmError { .. }
                | AppError::LlmTimeout { .. }
                | AppError::ContentFetch { .. }
                | AppError::Storage { .. }
                | AppError::HttpClient(_)
                | AppError::DatabaseConnection { .. }
        )
    }

    /// HTTP status an outer surface should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InvalidFormat { .. } => 400,

            AppError::NotFound { .. }
            | AppError::DocumentNotFound { .. }
            | AppError::ConversationNotFound { .. }
            | AppError::MessageNotFound { .. } => 404,

            AppError::EmbeddingError { .. }
            | AppError::LlmError { .. }
            | AppError::ContentFetch { .. }
            | AppError::HttpClient(_) => 502,

            AppError::EmbeddingTimeout { .. } | AppError::LlmTimeout { .. } => 504,

            AppError::DatabaseConnection { .. } | AppError::Storage { .. } => 503,

            AppError::IndexNotFound { .. }
            | AppError::ObjectNotFound { .. }
            | AppError::CorruptIndex { .. }
            | AppError::Database(_)
            | AppError::Sqlx(_)
            | AppError::DocumentParse { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => 500,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
