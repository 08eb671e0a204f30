//! Repository pattern for database operations
//!
//! Provides the Postgres implementation of `DocumentStore` plus the
//! conversation/message operations used by tooling.

use crate::conversations::{Conversation, Message, MessageSubProcess};
use crate::db::models::*;
use crate::db::store::{merge_metadata_map, DocumentFilter, DocumentStore};
use crate::db::DbPool;
use crate::documents::Document;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a conversation over the given documents, in selection order
    #[instrument(skip(self, document_ids), fields(documents = document_ids.len()))]
    pub async fn create_conversation(&self, document_ids: &[Uuid]) -> Result<Conversation> {
        let conversation_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.write_conn().begin().await?;

        ConversationActiveModel {
            id: Set(conversation_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        // Selection order is preserved through strictly increasing timestamps
        for (position, document_id) in document_ids.iter().enumerate() {
            let selected_at = now + chrono::Duration::microseconds(position as i64);
            ConversationDocumentActiveModel {
                id: Set(Uuid::new_v4()),
                conversation_id: Set(conversation_id),
                document_id: Set(*document_id),
                created_at: Set(selected_at.into()),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        info!(conversation_id = %conversation_id, "Conversation created");

        self.fetch_conversation_with_messages(conversation_id)
            .await?
            .ok_or_else(|| AppError::ConversationNotFound {
                id: conversation_id.to_string(),
            })
    }

    /// Delete a conversation; messages and links cascade
    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let result = ConversationEntity::delete_by_id(conversation_id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Fetch one message with its sub-process trace
    pub async fn fetch_message_with_sub_processes(
        &self,
        message_id: Uuid,
    ) -> Result<Option<Message>> {
        let rows = MessageEntity::find_by_id(message_id)
            .find_with_related(MessageSubProcessEntity)
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .map(|(message, sub_processes)| message_from_row(message, sub_processes)))
    }

    async fn fetch_conversation_documents(&self, conversation_id: Uuid) -> Result<Vec<Document>> {
        let links = ConversationDocumentEntity::find()
            .filter(ConversationDocumentColumn::ConversationId.eq(conversation_id))
            .order_by_asc(ConversationDocumentColumn::CreatedAt)
            .find_also_related(DocumentEntity)
            .all(self.read_conn())
            .await?;

        Ok(links
            .into_iter()
            .filter_map(|(_, document)| document.map(document_from_row))
            .collect())
    }
}

#[async_trait]
impl DocumentStore for Repository {
    async fn fetch_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        let mut query = DocumentEntity::find();

        if let Some(id) = filter.id {
            query = query.filter(DocumentColumn::Id.eq(id));
        } else if let Some(ref ids) = filter.ids {
            query = query.filter(DocumentColumn::Id.is_in(ids.clone()));
        }

        if let Some(ref url) = filter.url {
            query = query.filter(DocumentColumn::Url.eq(url.as_str()));
        }

        if let Some(limit) = filter.effective_limit() {
            query = query.limit(limit);
        }

        let rows = query
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(self.read_conn())
            .await?;

        Ok(rows.into_iter().map(document_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_conversation_with_messages(&self, id: Uuid) -> Result<Option<Conversation>> {
        let Some(conversation) = ConversationEntity::find_by_id(id)
            .one(self.read_conn())
            .await?
        else {
            return Ok(None);
        };

        let messages = MessageEntity::find()
            .filter(MessageColumn::ConversationId.eq(id))
            .find_with_related(MessageSubProcessEntity)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(|(message, sub_processes)| message_from_row(message, sub_processes))
            .collect::<Vec<_>>();

        let documents = self.fetch_conversation_documents(id).await?;

        debug!(
            messages = messages.len(),
            documents = documents.len(),
            "Conversation loaded"
        );

        Ok(Some(Conversation {
            id: conversation.id,
            documents,
            messages,
            created_at: conversation.created_at.with_timezone(&Utc),
            updated_at: conversation.updated_at.with_timezone(&Utc),
        }))
    }

    /// Insert-or-merge keyed on URL.
    ///
    /// The insert is attempted with `ON CONFLICT DO NOTHING`; when the URL
    /// already exists the row is locked and its metadata deep-merged, so
    /// concurrent upserts for one URL serialise on the row lock.
    #[instrument(skip(self, document), fields(url = %document.url))]
    async fn upsert_document_by_url(&self, document: Document) -> Result<Document> {
        let txn = self.write_conn().begin().await?;

        let candidate = DocumentActiveModel {
            id: Set(document.id),
            url: Set(document.url.clone()),
            metadata_map: Set(Value::Object(document.metadata_map.clone())),
            created_at: Set(document.created_at.into()),
            updated_at: Set(document.updated_at.into()),
        };

        let inserted = DocumentEntity::insert(candidate)
            .on_conflict(OnConflict::column(DocumentColumn::Url).do_nothing().to_owned())
            .exec_without_returning(&txn)
            .await?;

        if inserted == 0 {
            let existing = DocumentEntity::find()
                .filter(DocumentColumn::Url.eq(document.url.as_str()))
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::DocumentNotFound {
                    id: document.url.clone(),
                })?;

            let mut metadata_map = match existing.metadata_map.clone() {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            merge_metadata_map(&mut metadata_map, document.metadata_map);

            let mut active: DocumentActiveModel = existing.into();
            active.metadata_map = Set(Value::Object(metadata_map));
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
            debug!("Merged metadata into existing document");
        }

        let stored = DocumentEntity::find()
            .filter(DocumentColumn::Url.eq(document.url.as_str()))
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound {
                id: document.url.clone(),
            })?;

        txn.commit().await?;

        Ok(document_from_row(stored))
    }
}

fn document_from_row(row: DocumentRow) -> Document {
    let metadata_map = match row.metadata_map {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Document {
        id: row.id,
        url: row.url,
        metadata_map,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    }
}

fn message_from_row(row: MessageRow, sub_processes: Vec<MessageSubProcessRow>) -> Message {
    Message {
        id: row.id,
        conversation_id: row.conversation_id,
        role: row.role.into(),
        content: row.content,
        status: row.status.into(),
        created_at: row.created_at.with_timezone(&Utc),
        sub_processes: sub_processes.into_iter().map(sub_process_from_row).collect(),
    }
}

fn sub_process_from_row(row: MessageSubProcessRow) -> MessageSubProcess {
    let metadata_map = match row.metadata_map {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    MessageSubProcess {
        id: row.id,
        message_id: Some(row.message_id),
        source: row.source.into(),
        status: row.status.into(),
        metadata_map,
        created_at: row.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{MessageRole, MessageStatus, SubProcessSource};
    use serde_json::json;

    #[test]
    fn test_document_row_conversion() {
        let now = Utc::now();
        let row = DocumentRow {
            id: Uuid::new_v4(),
            url: "https://example.com/10k.pdf".into(),
            metadata_map: json!({"sec_document": {"year": 2022}}),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let doc = document_from_row(row.clone());
        assert_eq!(doc.id, row.id);
        assert!(doc.metadata_map.contains_key("sec_document"));
    }

    #[test]
    fn test_non_object_metadata_becomes_empty() {
        let now = Utc::now();
        let row = DocumentRow {
            id: Uuid::new_v4(),
            url: "u".into(),
            metadata_map: json!([1, 2, 3]),
            created_at: now.into(),
            updated_at: now.into(),
        };
        assert!(document_from_row(row).metadata_map.is_empty());
    }

    #[test]
    fn test_message_row_conversion() {
        let now = Utc::now();
        let message_id = Uuid::new_v4();
        let row = MessageRow {
            id: message_id,
            conversation_id: Uuid::new_v4(),
            role: "assistant".into(),
            content: "hello".into(),
            status: "success".into(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let sub = MessageSubProcessRow {
            id: Uuid::new_v4(),
            message_id,
            source: "sub_question".into(),
            status: "finished".into(),
            metadata_map: None,
            created_at: now.into(),
        };
        let message = message_from_row(row, vec![sub]);
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.status, MessageStatus::Success);
        assert_eq!(message.sub_processes[0].source, SubProcessSource::SubQuestion);
        assert_eq!(message.sub_processes[0].message_id, Some(message_id));
    }
}
