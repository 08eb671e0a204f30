//! Vector store abstraction
//!
//! Provides:
//! - Node and query types shared by all stores
//! - Exact-match metadata filters applied inside the store query
//! - `VectorStore` trait with Postgres (pgvector) and in-memory implementations
//! - `VectorStoreRegistry`, the single-initialisation handle to the shared store

mod memory;
mod postgres;
mod registry;

pub use memory::InMemoryVectorStore;
pub use postgres::PgVectorStore;
pub use registry::{VectorStoreFactory, VectorStoreRegistry};

use async_trait::async_trait;
use docchat_common::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A chunk of a document as stored in the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub doc_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Node {
    pub fn new(doc_id: Uuid, text: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            doc_id,
            text: text.into(),
            metadata,
        }
    }

    /// Hex SHA-256 of the node text
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }

    /// 1-based page number recorded at parse time, 0 when unknown
    pub fn page_number(&self) -> u32 {
        self.metadata
            .get("page_number")
            .and_then(Value::as_u64)
            .map(|p| p as u32)
            .unwrap_or(0)
    }
}

/// A node with its embedding, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedNode {
    pub node: Node,
    pub embedding: Vec<f32>,
}

/// A retrieved node and its similarity score (higher is closer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: Node,
    pub score: f32,
}

/// `metadata[key] == value`, comparing string forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactMatchFilter {
    pub key: String,
    pub value: String,
}

/// Conjunction of exact-match filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilters {
    pub filters: Vec<ExactMatchFilter>,
}

impl MetadataFilters {
    pub fn exact(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            filters: vec![ExactMatchFilter {
                key: key.into(),
                value: value.into(),
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether a node's metadata satisfies every filter
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.filters.iter().all(|f| match metadata.get(&f.key) {
            Some(Value::String(s)) => *s == f.value,
            Some(other) => other.to_string() == f.value,
            None => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreQuery {
    pub embedding: Vec<f32>,
    pub similarity_top_k: usize,
    pub filters: MetadataFilters,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Stable identity used in cache keys
    fn store_id(&self) -> &str;

    /// Insert or replace nodes by id
    async fn add(&self, nodes: &[EmbeddedNode]) -> Result<()>;

    /// Top-k nodes by cosine similarity, filters applied before ranking
    async fn query(&self, query: &VectorStoreQuery) -> Result<Vec<NodeWithScore>>;

    /// Remove every node of a document, returning how many were removed
    async fn delete_document(&self, doc_id: Uuid) -> Result<u64>;

    /// Number of nodes stored for a document
    async fn count_document_nodes(&self, doc_id: Uuid) -> Result<u64>;
}
