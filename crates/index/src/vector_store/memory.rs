//! In-memory vector store

use super::{EmbeddedNode, NodeWithScore, VectorStore, VectorStoreQuery};
use async_trait::async_trait;
use docchat_common::embeddings::cosine_similarity;
use docchat_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// Brute-force cosine search over nodes held in memory
pub struct InMemoryVectorStore {
    id: String,
    nodes: RwLock<HashMap<Uuid, EmbeddedNode>>,
    adds: AtomicUsize,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::with_id(format!("memory:{}", Uuid::new_v4()))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: RwLock::new(HashMap::new()),
            adds: AtomicUsize::new(0),
        }
    }

    /// Number of `add` calls served
    pub fn add_calls(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> AppError {
    AppError::Internal {
        message: "vector store lock poisoned".to_string(),
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn store_id(&self) -> &str {
        &self.id
    }

    async fn add(&self, nodes: &[EmbeddedNode]) -> Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.nodes.write().map_err(|_| poisoned())?;
        for node in nodes {
            stored.insert(node.node.id, node.clone());
        }
        Ok(())
    }

    async fn query(&self, query: &VectorStoreQuery) -> Result<Vec<NodeWithScore>> {
        let stored = self.nodes.read().map_err(|_| poisoned())?;

        let mut results: Vec<NodeWithScore> = stored
            .values()
            .filter(|n| query.filters.matches(&n.node.metadata))
            .filter(|n| n.embedding.len() == query.embedding.len())
            .map(|n| NodeWithScore {
                node: n.node.clone(),
                score: cosine_similarity(&n.embedding, &query.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        results.truncate(query.similarity_top_k);
        Ok(results)
    }

    async fn delete_document(&self, doc_id: Uuid) -> Result<u64> {
        let mut stored = self.nodes.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|_, n| n.node.doc_id != doc_id);
        Ok((before - stored.len()) as u64)
    }

    async fn count_document_nodes(&self, doc_id: Uuid) -> Result<u64> {
        let stored = self.nodes.read().map_err(|_| poisoned())?;
        Ok(stored.values().filter(|n| n.node.doc_id == doc_id).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{MetadataFilters, Node};
    use serde_json::{Map, Value};

    fn node(doc_id: Uuid, embedding: Vec<f32>) -> EmbeddedNode {
        let mut metadata = Map::new();
        metadata.insert("db_document_id".into(), Value::String(doc_id.to_string()));
        EmbeddedNode {
            node: Node::new(doc_id, "t", metadata),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_filter_applies_before_ranking() {
        let store = InMemoryVectorStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .add(&[node(a, vec![0.0, 1.0]), node(b, vec![1.0, 0.0]), node(b, vec![0.9, 0.1])])
            .await
            .unwrap();

        let results = store
            .query(&VectorStoreQuery {
                embedding: vec![1.0, 0.0],
                similarity_top_k: 2,
                filters: MetadataFilters::exact("db_document_id", a.to_string()),
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node.doc_id, a);
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let store = InMemoryVectorStore::new();
        let a = Uuid::new_v4();
        store.add(&[node(a, vec![1.0]), node(a, vec![0.5])]).await.unwrap();
        assert_eq!(store.count_document_nodes(a).await.unwrap(), 2);
        assert_eq!(store.delete_document(a).await.unwrap(), 2);
        assert!(store.is_empty());
    }
}
