//! Persisted index state
//!
//! A storage context binds a persist directory in the object store to the
//! shared vector store. The directory holds a manifest (`storage.json`) and
//! one index record per document (`indices/{doc_id}.json`). A record is only
//! written after all of its vectors are in the store, so a present record
//! always describes a complete index.

use crate::vector_store::VectorStore;
use chrono::{DateTime, Utc};
use docchat_common::errors::{AppError, Result};
use docchat_common::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "storage.json";
pub const INDICES_DIR: &str = "indices";
const MANIFEST_VERSION: u32 = 1;

/// Contents of `storage.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageManifest {
    pub version: u32,
    pub vector_store_id: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted record of one document's vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStruct {
    pub index_id: Uuid,
    pub doc_id: Uuid,
    pub embedding_model: String,
    pub dimension: usize,
    pub node_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl IndexStruct {
    pub fn new(doc_id: Uuid, embedding_model: impl Into<String>, dimension: usize, node_ids: Vec<Uuid>) -> Self {
        Self {
            index_id: Uuid::new_v4(),
            doc_id,
            embedding_model: embedding_model.into(),
            dimension,
            node_ids,
            created_at: Utc::now(),
        }
    }
}

pub struct StorageContext {
    persist_dir: String,
    manifest: StorageManifest,
    vector_store: Arc<dyn VectorStore>,
    fs: Arc<dyn ObjectStore>,
}

impl StorageContext {
    /// Open an existing context. Fails with `ObjectNotFound` when the
    /// directory has no manifest yet.
    pub async fn open(
        persist_dir: &str,
        vector_store: Arc<dyn VectorStore>,
        fs: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let path = manifest_path(persist_dir);
        let bytes = fs.read(&path).await?;
        let manifest: StorageManifest = serde_json::from_slice(&bytes)?;

        debug!(persist_dir, version = manifest.version, "Storage context opened");
        Ok(Self {
            persist_dir: persist_dir.to_string(),
            manifest,
            vector_store,
            fs,
        })
    }

    /// Create a fresh context and write its manifest
    pub async fn create(
        persist_dir: &str,
        vector_store: Arc<dyn VectorStore>,
        fs: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        fs.create_dir(&format!("{}/{}", persist_dir, INDICES_DIR)).await?;
        let context = Self {
            persist_dir: persist_dir.to_string(),
            manifest: StorageManifest {
                version: MANIFEST_VERSION,
                vector_store_id: vector_store.store_id().to_string(),
                created_at: Utc::now(),
            },
            vector_store,
            fs,
        };
        context.persist().await?;

        info!(persist_dir, "Created new storage context");
        Ok(context)
    }

    pub async fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.manifest)?;
        self.fs.write(&manifest_path(&self.persist_dir), &bytes).await
    }

    pub fn persist_dir(&self) -> &str {
        &self.persist_dir
    }

    pub fn manifest(&self) -> &StorageManifest {
        &self.manifest
    }

    pub fn vector_store(&self) -> Arc<dyn VectorStore> {
        self.vector_store.clone()
    }

    pub fn store_id(&self) -> &str {
        self.vector_store.store_id()
    }

    /// Load a document's index record, validating it against the embedding
    /// model in use and the vectors actually stored.
    ///
    /// Missing records yield `IndexNotFound`; unreadable or stale ones yield
    /// `CorruptIndex`.
    pub async fn load_index(&self, doc_id: Uuid, expected_model: &str) -> Result<IndexStruct> {
        let bytes = match self.fs.read(&self.index_path(doc_id)).await {
            Ok(bytes) => bytes,
            Err(AppError::ObjectNotFound { .. }) => {
                return Err(AppError::IndexNotFound {
                    doc_id: doc_id.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let index: IndexStruct = serde_json::from_slice(&bytes).map_err(|e| AppError::CorruptIndex {
            doc_id: doc_id.to_string(),
            reason: format!("unreadable index record: {}", e),
        })?;

        if index.doc_id != doc_id {
            return Err(AppError::CorruptIndex {
                doc_id: doc_id.to_string(),
                reason: format!("record belongs to {}", index.doc_id),
            });
        }

        if index.embedding_model != expected_model {
            return Err(AppError::CorruptIndex {
                doc_id: doc_id.to_string(),
                reason: format!(
                    "embedding model changed from {} to {}",
                    index.embedding_model, expected_model
                ),
            });
        }

        let stored = self.vector_store.count_document_nodes(doc_id).await?;
        if stored != index.node_ids.len() as u64 {
            return Err(AppError::CorruptIndex {
                doc_id: doc_id.to_string(),
                reason: format!(
                    "record lists {} nodes but the vector store holds {}",
                    index.node_ids.len(),
                    stored
                ),
            });
        }

        Ok(index)
    }

    pub async fn persist_index(&self, index: &IndexStruct) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        self.fs.write(&self.index_path(index.doc_id), &bytes).await
    }

    fn index_path(&self, doc_id: Uuid) -> String {
        format!("{}/{}/{}.json", self.persist_dir, INDICES_DIR, doc_id)
    }
}

fn manifest_path(persist_dir: &str) -> String {
    format!("{}/{}", persist_dir, MANIFEST_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{EmbeddedNode, InMemoryVectorStore, Node};
    use docchat_common::storage::MemoryObjectStore;
    use serde_json::Map;

    async fn context() -> (StorageContext, Arc<InMemoryVectorStore>, Arc<MemoryObjectStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let fs = Arc::new(MemoryObjectStore::new());
        let context = StorageContext::create("index", store.clone(), fs.clone()).await.unwrap();
        (context, store, fs)
    }

    #[tokio::test]
    async fn test_open_requires_manifest() {
        let result = StorageContext::open(
            "missing",
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(MemoryObjectStore::new()),
        )
        .await;
        assert!(matches!(result, Err(AppError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_then_open() {
        let (context, store, fs) = context().await;
        let reopened = StorageContext::open("index", store, fs).await.unwrap();
        assert_eq!(reopened.manifest(), context.manifest());
    }

    #[tokio::test]
    async fn test_load_index_validates_record() {
        let (context, store, _) = context().await;
        let doc_id = Uuid::new_v4();

        assert!(matches!(
            context.load_index(doc_id, "m").await,
            Err(AppError::IndexNotFound { .. })
        ));

        let node = Node::new(doc_id, "text", Map::new());
        store
            .add(&[EmbeddedNode {
                node: node.clone(),
                embedding: vec![1.0],
            }])
            .await
            .unwrap();
        let index = IndexStruct::new(doc_id, "m", 1, vec![node.id]);
        context.persist_index(&index).await.unwrap();

        assert_eq!(context.load_index(doc_id, "m").await.unwrap(), index);
        assert!(matches!(
            context.load_index(doc_id, "other-model").await,
            Err(AppError::CorruptIndex { .. })
        ));

        store.delete_document(doc_id).await.unwrap();
        assert!(matches!(
            context.load_index(doc_id, "m").await,
            Err(AppError::CorruptIndex { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_record_is_corrupt() {
        let (context, _, fs) = context().await;
        let doc_id = Uuid::new_v4();
        fs.write(&format!("index/indices/{}.json", doc_id), b"{not json")
            .await
            .unwrap();
        assert!(matches!(
            context.load_index(doc_id, "m").await,
            Err(AppError::CorruptIndex { .. })
        ));
    }
}
