//! Index seeding for every stored document

use docchat_common::db::DocumentFilter;
use docchat_common::documents::Document;
use docchat_common::errors::Result;
use docchat_common::storage::ObjectStore;
use docchat_common::DocumentStore;
use docchat_index::{IndexBuilder, ObjectStoreFetcher};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a seeding run
#[derive(Debug, Default)]
pub struct SeedReport {
    pub indexed: Vec<Uuid>,
    /// Documents whose source object does not exist
    pub skipped: Vec<Document>,
    /// Documents whose index could not be built, with the reason
    pub failed: Vec<(Uuid, String)>,
}

impl SeedReport {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Indexed {} document(s), skipped {}, failed {}",
            self.indexed.len(),
            self.skipped.len(),
            self.failed.len()
        );
        for document in &self.skipped {
            out.push_str(&format!("\n  skipped {} (missing object {})", document.id, document.url));
        }
        for (id, reason) in &self.failed {
            out.push_str(&format!("\n  failed  {}: {}", id, reason));
        }
        out
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Split documents into those whose source can be read and those whose
/// object is missing from the store. Remote URLs are always attempted.
pub async fn partition_present(
    documents: Vec<Document>,
    fs: &dyn ObjectStore,
) -> Result<(Vec<Document>, Vec<Document>)> {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for document in documents {
        if is_remote(&document.url) || fs.exists(ObjectStoreFetcher::object_path(&document.url)).await? {
            present.push(document);
        } else {
            warn!(document_id = %document.id, url = %document.url, "Source object missing, skipping");
            missing.push(document);
        }
    }
    Ok((present, missing))
}

/// Build or load the index of every stored document
pub async fn seed_indices(
    store: &dyn DocumentStore,
    builder: &IndexBuilder,
    assets: Arc<dyn ObjectStore>,
    index_fs: Arc<dyn ObjectStore>,
) -> Result<SeedReport> {
    let documents = store.fetch_documents(DocumentFilter::default()).await?;
    info!(documents = documents.len(), "Seeding indices");

    let (present, skipped) = partition_present(documents, assets.as_ref()).await?;
    let index_map = builder.build_index_map(&present, index_fs).await?;

    let mut indexed: Vec<Uuid> = index_map.indices.keys().copied().collect();
    indexed.sort();
    Ok(SeedReport {
        indexed,
        skipped,
        failed: index_map
            .failures
            .iter()
            .map(|f| (f.document_id, f.error.to_string()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::db::InMemoryDocumentStore;
    use docchat_common::embeddings::MockEmbedder;
    use docchat_common::storage::MemoryObjectStore;
    use docchat_index::{
        CategoryProfiles, EmbedderSet, InMemoryVectorStore, StorageContextCache, VectorStoreRegistry,
    };
    use serde_json::Map;

    #[tokio::test]
    async fn test_seed_skips_missing_objects() {
        let assets: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        assets
            .write("docs/present.txt", b"Quarterly revenue grew across every segment.")
            .await
            .unwrap();

        let store = InMemoryDocumentStore::new();
        let present = store
            .upsert_document_by_url(Document::new("docs/present.txt", Map::new()))
            .await
            .unwrap();
        let missing = store
            .upsert_document_by_url(Document::new("file://docs/missing.txt", Map::new()))
            .await
            .unwrap();

        let profiles = CategoryProfiles::default();
        let builder = IndexBuilder::new(
            Arc::new(VectorStoreRegistry::with_store(Arc::new(InMemoryVectorStore::new()))),
            Arc::new(StorageContextCache::default()),
            Arc::new(ObjectStoreFetcher::new(assets.clone())),
            EmbedderSet::uniform(Arc::new(MockEmbedder::new(32)), &profiles),
            profiles,
            "docchat-index",
        )
        .unwrap();

        let report = seed_indices(&store, &builder, assets, Arc::new(MemoryObjectStore::new()))
            .await
            .unwrap();

        assert_eq!(report.indexed, vec![present.id]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, missing.id);
        assert!(report.failed.is_empty());
        assert!(report.summary().contains("skipped 1"));
    }
}
