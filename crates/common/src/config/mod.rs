//! Configuration management for DocChat
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Only binaries load configuration; libraries receive the relevant section.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Object storage holding document blobs and persisted indices
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat / tool model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// In-process cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Document download configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Log sub-questions and tool rounds at info level
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Deployment flavour of the object store
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageEnvironment {
    /// Local directory that may be created on demand
    #[default]
    Local,
    /// Pre-provisioned bucket that must already exist
    Production,
}

/// Where object store paths resolve
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Directories under `root`
    #[default]
    Filesystem,
    /// S3 buckets; the first path segment names the bucket
    S3,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Filesystem or S3
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory of the filesystem store
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// S3 endpoint override (e.g. a LocalStack URL)
    pub endpoint_url: Option<String>,

    /// S3 region; falls back to the AWS environment
    pub region: Option<String>,

    /// Bucket holding document assets
    #[serde(default = "default_asset_bucket")]
    pub asset_bucket: String,

    /// Bucket (persist directory) holding index manifests
    #[serde(default = "default_index_bucket")]
    pub index_bucket: String,

    /// Local or production
    #[serde(default)]
    pub environment: StorageEnvironment,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model used for financial and uncategorised documents
    #[serde(default = "default_financial_embedding_model")]
    pub financial_model: String,

    /// Model used for clinical guidelines
    #[serde(default = "default_clinical_embedding_model")]
    pub clinical_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// LLM provider: openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the chat completion service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model driving the top-level agent
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used by sub-engines (routing, synthesis)
    #[serde(default = "default_tool_model")]
    pub tool_model: String,

    /// Sampling temperature for the agent
    #[serde(default)]
    pub chat_temperature: f32,

    /// Sampling temperature for sub-engines
    #[serde(default = "default_tool_temperature")]
    pub tool_temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Hard cap on tool-call rounds per chat turn
    #[serde(default = "default_max_function_calls")]
    pub max_function_calls: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Table holding embedded nodes
    #[serde(default = "default_vector_table")]
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Storage context freshness window in seconds
    #[serde(default = "default_storage_context_ttl")]
    pub storage_context_ttl_secs: u64,

    /// Maximum cached storage contexts
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Timeout in seconds for downloading a document by URL
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name attached to logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_storage_root() -> String { "./storage".to_string() }
fn default_asset_bucket() -> String { "docchat-assets".to_string() }
fn default_index_bucket() -> String { "docchat-index".to_string() }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_financial_embedding_model() -> String { "text-embedding-ada-002".to_string() }
fn default_clinical_embedding_model() -> String { "text-embedding-3-large".to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 100 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_tool_model() -> String { "gpt-4o-mini".to_string() }
fn default_tool_temperature() -> f32 { 0.1 }
fn default_llm_timeout() -> u64 { 60 }
fn default_max_function_calls() -> usize { 3 }
fn default_vector_table() -> String { "pg_vector_store".to_string() }
fn default_storage_context_ttl() -> u64 { 300 }
fn default_cache_entries() -> usize { 10 }
fn default_fetch_timeout() -> u64 { 120 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "docchat".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            endpoint_url: None,
            region: None,
            asset_bucket: default_asset_bucket(),
            index_bucket: default_index_bucket(),
            environment: StorageEnvironment::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            financial_model: default_financial_embedding_model(),
            clinical_model: default_clinical_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            chat_model: default_chat_model(),
            tool_model: default_tool_model(),
            chat_temperature: 0.0,
            tool_temperature: default_tool_temperature(),
            timeout_secs: default_llm_timeout(),
            max_function_calls: default_max_function_calls(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self { table_name: default_vector_table() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_context_ttl_secs: default_storage_context_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Embedding request timeout
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    /// Document download timeout
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    /// Chat / tool model request timeout
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    /// Storage context freshness window
    pub fn storage_context_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.storage_context_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/docchat".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            vector_store: VectorStoreConfig::default(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            observability: ObservabilityConfig::default(),
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.financial_model, "text-embedding-ada-002");
        assert_eq!(config.embedding.clinical_model, "text-embedding-3-large");
        assert_eq!(config.llm.max_function_calls, 3);
        assert_eq!(config.storage_context_ttl(), Duration::from_secs(300));
        assert_eq!(config.download_timeout(), Duration::from_secs(120));
        assert_ne!(config.download_timeout(), config.embedding_timeout());
    }

    #[test]
    fn test_s3_backend_section() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://db/docchat" },
            "storage": { "backend": "s3", "endpoint_url": "http://localhost:4566", "region": "us-east-1" },
            "fetch": { "timeout_secs": 15 }
        }))
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.download_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/docchat");
    }

    #[test]
    fn test_sections_default_when_missing() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://db/docchat" },
            "storage": { "environment": "production" }
        }))
        .unwrap();
        assert_eq!(config.storage.environment, StorageEnvironment::Production);
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.storage.index_bucket, "docchat-index");
        assert_eq!(config.download_timeout(), Duration::from_secs(120));
        assert_eq!(config.vector_store.table_name, "pg_vector_store");
        assert!(!config.verbose);
    }
}
