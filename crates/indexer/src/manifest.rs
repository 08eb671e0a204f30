//! Clinical guideline manifests
//!
//! A manifest is a JSON array of `{ "url": ..., "metadata": { ... } }`
//! entries where `metadata` follows the clinical guideline schema.

use docchat_common::documents::{ClinicalGuidelineMetadata, Document, CLINICAL_GUIDELINE_KEY};
use docchat_common::errors::{AppError, Result};
use docchat_common::DocumentStore;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    pub metadata: ClinicalGuidelineMetadata,
}

impl ManifestEntry {
    pub fn into_document(self) -> Result<Document> {
        let mut metadata_map = Map::new();
        metadata_map.insert(
            CLINICAL_GUIDELINE_KEY.to_string(),
            serde_json::to_value(&self.metadata)?,
        );
        Ok(Document::new(self.url, metadata_map))
    }
}

pub fn parse_manifest(raw: &str) -> Result<Vec<ManifestEntry>> {
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(raw).map_err(|e| AppError::InvalidFormat {
            message: format!("invalid guideline manifest: {}", e),
        })?;

    if let Some(entry) = entries.iter().find(|e| e.url.trim().is_empty()) {
        return Err(AppError::InvalidFormat {
            message: format!("manifest entry '{}' has an empty url", entry.metadata.title),
        });
    }
    Ok(entries)
}

/// Upsert every manifest entry by URL, returning the stored documents
pub async fn upsert_manifest(store: &dyn DocumentStore, raw: &str) -> Result<Vec<Document>> {
    let mut stored = Vec::new();
    for entry in parse_manifest(raw)? {
        let document = store.upsert_document_by_url(entry.into_document()?).await?;
        info!(document_id = %document.id, url = %document.url, "Upserted guideline");
        stored.push(document);
    }
    Ok(stored)
}

/// Metadata value for a stored document, for display
pub fn guideline_title(document: &Document) -> Option<String> {
    document
        .metadata_map
        .get(CLINICAL_GUIDELINE_KEY)
        .and_then(|v| v.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::db::{DocumentFilter, InMemoryDocumentStore};
    use docchat_common::documents::DocumentCategory;

    const MANIFEST: &str = r#"[
        {"url": "guidelines/htn.pdf",
         "metadata": {"title": "Hypertension in adults", "issuing_organization": "NICE",
                      "publication_date": "2019-08-28"}}
    ]"#;

    #[tokio::test]
    async fn test_upsert_twice_merges_by_url() {
        let store = InMemoryDocumentStore::new();

        let first = upsert_manifest(&store, MANIFEST).await.unwrap();
        assert_eq!(first[0].category(), DocumentCategory::ClinicalGuideline);

        let revised = MANIFEST.replace("2019-08-28", "2023-11-21");
        let second = upsert_manifest(&store, &revised).await.unwrap();
        assert_eq!(second[0].id, first[0].id);

        let stored = store
            .fetch_documents(DocumentFilter::by_url("guidelines/htn.pdf"))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        let metadata = stored[0].clinical_metadata().unwrap().unwrap();
        assert_eq!(metadata.publication_date.as_deref(), Some("2023-11-21"));
        assert_eq!(guideline_title(&stored[0]).as_deref(), Some("Hypertension in adults"));
    }

    #[test]
    fn test_rejects_bad_manifests() {
        assert!(matches!(
            parse_manifest("{}"),
            Err(AppError::InvalidFormat { .. })
        ));
        assert!(parse_manifest(
            r#"[{"url": " ", "metadata": {"title": "T", "issuing_organization": "O"}}]"#
        )
        .is_err());
    }
}
