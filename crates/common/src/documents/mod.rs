//! Document domain types
//!
//! Provides:
//! - `Document` with its type-tagged metadata map
//! - The closed `DocumentCategory` set, resolved through a key table
//! - Per-category metadata schemas parsed on demand
//! - Title and description builders that degrade on malformed metadata

mod metadata;

pub use metadata::{
    ClinicalGuidelineMetadata, EvidenceGrade, SecDocType, SecDocumentMetadata,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Node metadata key carrying the owning document id
pub const DB_DOC_ID_KEY: &str = "db_document_id";

/// Metadata key for SEC filings
pub const SEC_DOCUMENT_KEY: &str = "sec_document";

/// Metadata key for clinical guidelines
pub const CLINICAL_GUIDELINE_KEY: &str = "clinical_guideline";

/// Closed set of document categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    SecFiling,
    ClinicalGuideline,
    General,
}

/// Metadata key -> category. Checked in order; the first key present wins.
const CATEGORY_KEYS: &[(&str, DocumentCategory)] = &[
    (SEC_DOCUMENT_KEY, DocumentCategory::SecFiling),
    (CLINICAL_GUIDELINE_KEY, DocumentCategory::ClinicalGuideline),
];

impl DocumentCategory {
    pub const ALL: [DocumentCategory; 3] = [
        DocumentCategory::SecFiling,
        DocumentCategory::ClinicalGuideline,
        DocumentCategory::General,
    ];

    /// Resolve the category from a document metadata map
    pub fn from_metadata(metadata_map: &Map<String, Value>) -> Self {
        CATEGORY_KEYS
            .iter()
            .find(|(key, _)| metadata_map.contains_key(*key))
            .map(|(_, category)| *category)
            .unwrap_or(DocumentCategory::General)
    }

    /// Key under which this category stores its metadata, if any
    pub fn metadata_key(&self) -> Option<&'static str> {
        CATEGORY_KEYS
            .iter()
            .find(|(_, category)| category == self)
            .map(|(key, _)| *key)
    }

    /// Value written to the `document_type` node metadata field
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::SecFiling => SEC_DOCUMENT_KEY,
            DocumentCategory::ClinicalGuideline => CLINICAL_GUIDELINE_KEY,
            DocumentCategory::General => "general",
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-selectable document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub url: String,
    #[serde(default)]
    pub metadata_map: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document with a fresh id
    pub fn new(url: impl Into<String>, metadata_map: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            metadata_map,
            created_at: now,
            updated_at: now,
        }
    }

    /// Category resolved from the metadata map
    pub fn category(&self) -> DocumentCategory {
        DocumentCategory::from_metadata(&self.metadata_map)
    }

    /// Parse the SEC metadata block. `None` when the document is not a filing.
    pub fn sec_metadata(&self) -> Option<Result<SecDocumentMetadata, serde_json::Error>> {
        self.metadata_map
            .get(SEC_DOCUMENT_KEY)
            .map(|value| serde_json::from_value(value.clone()))
    }

    /// Parse the clinical guideline block. `None` when the document is not a guideline.
    pub fn clinical_metadata(
        &self,
    ) -> Option<Result<ClinicalGuidelineMetadata, serde_json::Error>> {
        self.metadata_map
            .get(CLINICAL_GUIDELINE_KEY)
            .map(|value| serde_json::from_value(value.clone()))
    }
}

/// Fallback title when metadata is missing or malformed
pub const UNTITLED_DOCUMENT: &str = "Untitled document";

/// Human-readable title used in prompts
pub fn build_title_for_document(document: &Document) -> String {
    match document.category() {
        DocumentCategory::SecFiling => match document.sec_metadata() {
            Some(Ok(sec)) => format!(
                "{} ({}) {} ({})",
                sec.company_name,
                sec.company_ticker,
                sec.doc_type,
                sec.time_period()
            ),
            Some(Err(e)) => {
                warn!(document_id = %document.id, error = %e, "Malformed SEC metadata");
                UNTITLED_DOCUMENT.to_string()
            }
            None => UNTITLED_DOCUMENT.to_string(),
        },
        DocumentCategory::ClinicalGuideline => match document.clinical_metadata() {
            Some(Ok(guideline)) => {
                format!("{}-{}", guideline.title, guideline.issuing_organization)
            }
            Some(Err(e)) => {
                warn!(document_id = %document.id, error = %e, "Malformed clinical guideline metadata");
                UNTITLED_DOCUMENT.to_string()
            }
            None => UNTITLED_DOCUMENT.to_string(),
        },
        DocumentCategory::General => UNTITLED_DOCUMENT.to_string(),
    }
}

/// Description used as the per-document tool description
pub fn build_description_for_document(document: &Document) -> String {
    match document.category() {
        DocumentCategory::SecFiling => match document.sec_metadata() {
            Some(Ok(sec)) => format!(
                "A SEC {} filing describing the financials of {} ({}) for the {} time period.",
                sec.doc_type,
                sec.company_name,
                sec.company_ticker,
                sec.time_period()
            ),
            Some(Err(e)) => {
                warn!(document_id = %document.id, error = %e, "Malformed SEC metadata");
                "A SEC financial filing.".to_string()
            }
            None => generic_description(),
        },
        DocumentCategory::ClinicalGuideline => match document.clinical_metadata() {
            Some(Ok(guideline)) => {
                let mut description = format!(
                    "A clinical guideline titled '{}' published by {}",
                    guideline.title, guideline.issuing_organization
                );
                if let Some(year) = guideline.publication_year() {
                    description.push_str(&format!(" in {}", year));
                }
                description.push('.');
                description
            }
            Some(Err(e)) => {
                warn!(document_id = %document.id, error = %e, "Malformed clinical guideline metadata");
                "A clinical guideline document.".to_string()
            }
            None => generic_description(),
        },
        DocumentCategory::General => generic_description(),
    }
}

fn generic_description() -> String {
    "A document containing useful information that the user pre-selected to discuss with the assistant."
        .to_string()
}
