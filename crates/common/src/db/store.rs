//! Persistence contract consumed by the engine
//!
//! The engine only reads documents and conversations and upserts documents
//! by URL. `Repository` implements this over Postgres; `InMemoryDocumentStore`
//! backs tests and offline tooling.

use crate::conversations::Conversation;
use crate::documents::Document;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Filter for `fetch_documents`. `id` wins over `ids`; `url` narrows either.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub id: Option<Uuid>,
    pub ids: Option<Vec<Uuid>>,
    pub url: Option<String>,
    pub limit: Option<u64>,
}

impl DocumentFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self { id: Some(id), ..Default::default() }
    }

    pub fn by_ids(ids: Vec<Uuid>) -> Self {
        Self { ids: Some(ids), ..Default::default() }
    }

    pub fn by_url(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), ..Default::default() }
    }

    /// Effective limit: single-id lookups return at most one row
    pub fn effective_limit(&self) -> Option<u64> {
        if self.id.is_some() {
            Some(1)
        } else {
            self.limit
        }
    }

    fn matches(&self, document: &Document) -> bool {
        let id_ok = match (&self.id, &self.ids) {
            (Some(id), _) => document.id == *id,
            (None, Some(ids)) => ids.contains(&document.id),
            (None, None) => true,
        };
        let url_ok = self.url.as_ref().map_or(true, |u| document.url == *u);
        id_ok && url_ok
    }
}

/// Read/upsert access to documents and conversations
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch documents by id, id list, and/or URL
    async fn fetch_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>>;

    /// Fetch a conversation with its documents and messages
    async fn fetch_conversation_with_messages(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Insert a document, or merge its metadata into the existing row with the same URL
    async fn upsert_document_by_url(&self, document: Document) -> Result<Document>;
}

/// Deep-merge `patch` into `target`.
///
/// Objects merge key by key; any other value in `patch` replaces the target
/// value. `null` in the patch leaves the existing value untouched.
pub fn merge_metadata(target: &mut Value, patch: Value) {
    match (target, patch) {
        (_, Value::Null) => {}
        (Value::Object(target_map), Value::Object(patch_map)) => {
            merge_metadata_map(target_map, patch_map);
        }
        (target, patch) => *target = patch,
    }
}

/// `merge_metadata` specialised to top-level maps
pub fn merge_metadata_map(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match target.get_mut(&key) {
            Some(existing) => merge_metadata(existing, value),
            None if value.is_null() => {}
            None => {
                target.insert(key, value);
            }
        }
    }
}

/// Process-local document store
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a conversation as-is (its documents are upserted as well)
    pub fn insert_conversation(&self, conversation: Conversation) -> Result<()> {
        {
            let mut documents = self.write_documents()?;
            for doc in &conversation.documents {
                if !documents.iter().any(|d| d.id == doc.id) {
                    documents.push(doc.clone());
                }
            }
        }
        self.conversations
            .write()
            .map_err(|_| poisoned())?
            .insert(conversation.id, conversation);
        Ok(())
    }

    fn write_documents(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Document>>> {
        self.documents.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> AppError {
    AppError::Internal {
        message: "in-memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        let limit = filter.effective_limit().map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(documents
            .iter()
            .filter(|d| filter.matches(d))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_conversation_with_messages(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().map_err(|_| poisoned())?;
        Ok(conversations.get(&id).cloned())
    }

    async fn upsert_document_by_url(&self, document: Document) -> Result<Document> {
        let mut documents = self.write_documents()?;
        if let Some(existing) = documents.iter_mut().find(|d| d.url == document.url) {
            merge_metadata_map(&mut existing.metadata_map, document.metadata_map);
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }
        documents.push(document.clone());
        Ok(document)
    }
}
