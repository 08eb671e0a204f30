//! Category processors
//!
//! Turns extracted page text into vector-store nodes. The financial processor
//! handles SEC filings and general documents; the guideline processor adds
//! guideline metadata and per-chunk recommendation / evidence tags.

use crate::chunker::{chunk_text, ChunkingConfig};
use crate::pdf::PageText;
use crate::profiles::CategoryProfile;
use crate::vector_store::Node;
use docchat_common::documents::{
    build_title_for_document, Document, DocumentCategory, EvidenceGrade, DB_DOC_ID_KEY,
};
use docchat_common::errors::{AppError, Result};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts a document's pages into nodes ready for embedding
pub trait DocumentProcessor: Send + Sync {
    fn process(&self, document: &Document, pages: &[PageText]) -> Result<Vec<Node>>;
}

/// Build the processor matching a category profile
pub fn processor_for(profile: &CategoryProfile) -> Result<Arc<dyn DocumentProcessor>> {
    match profile.category {
        DocumentCategory::ClinicalGuideline => {
            Ok(Arc::new(GuidelineProcessor::new(profile.chunking.clone())?))
        }
        DocumentCategory::SecFiling | DocumentCategory::General => {
            Ok(Arc::new(FinancialProcessor::new(profile.chunking.clone())))
        }
    }
}

/// Metadata every node carries regardless of category
fn base_metadata(document: &Document, page_number: u32, chunk_index: usize) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(DB_DOC_ID_KEY.to_string(), Value::String(document.id.to_string()));
    metadata.insert(
        "document_type".to_string(),
        Value::String(document.category().as_str().to_string()),
    );
    metadata.insert("page_number".to_string(), Value::from(page_number));
    metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
    metadata
}

/// Paragraph chunking for SEC filings and uncategorised documents
pub struct FinancialProcessor {
    chunking: ChunkingConfig,
}

impl FinancialProcessor {
    pub fn new(chunking: ChunkingConfig) -> Self {
        Self { chunking }
    }
}

impl DocumentProcessor for FinancialProcessor {
    fn process(&self, document: &Document, pages: &[PageText]) -> Result<Vec<Node>> {
        let sec = match document.sec_metadata() {
            Some(Ok(sec)) => Some(sec),
            Some(Err(e)) => {
                warn!(document_id = %document.id, error = %e, "Malformed SEC metadata, indexing without it");
                None
            }
            None => None,
        };

        let mut nodes = Vec::new();
        let mut chunk_index = 0;
        for page in pages {
            for chunk in chunk_text(&page.text, &self.chunking)? {
                let mut metadata = base_metadata(document, page.page_number, chunk_index);
                if let Some(sec) = &sec {
                    metadata.insert(
                        "company_ticker".to_string(),
                        Value::String(sec.company_ticker.clone()),
                    );
                    metadata.insert("doc_type".to_string(), Value::String(sec.doc_type.to_string()));
                }
                nodes.push(Node::new(document.id, chunk.content, metadata));
                chunk_index += 1;
            }
        }

        debug!(document_id = %document.id, nodes = nodes.len(), "Financial document processed");
        Ok(nodes)
    }
}

/// Recommendation and evidence tags detected in a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicalTags {
    pub evidence_grade: Option<EvidenceGrade>,
    pub recommendation_strength: Option<String>,
    pub is_recommendation: bool,
}

/// Pattern-based detector for guideline recommendation language
pub struct ClinicalTagger {
    grade: Regex,
    strength: Regex,
    recommendation: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Internal {
        message: format!("invalid clinical tagger pattern: {}", e),
    })
}

impl ClinicalTagger {
    pub fn new() -> Result<Self> {
        Ok(Self {
            grade: compile(
                r"(?i)\b(?:grade|level of evidence|evidence level|quality of evidence|loe)\s*[:\-]?\s*\(?\s*(GPP|EO|NG|A|B|C|D|I)\b",
            )?,
            strength: compile(
                r"(?i)\b(strong|conditional|weak|moderate)\s+recommendation\b|\brecommendation\s*(?:strength)?\s*[:\-]\s*(strong|conditional|weak|moderate)\b",
            )?,
            recommendation: compile(
                r"(?i)\b(?:we recommend|we suggest|is recommended|are recommended|is not recommended|should be|should not|should receive|recommendation\s+\d+)",
            )?,
        })
    }

    pub fn tag(&self, text: &str) -> ClinicalTags {
        let evidence_grade = self
            .grade
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| EvidenceGrade::from_label(m.as_str()));

        let recommendation_strength = self.strength.captures(text).and_then(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .map(|m| m.as_str().to_ascii_lowercase())
        });

        let is_recommendation = self.recommendation.is_match(text)
            || recommendation_strength.is_some()
            || evidence_grade.is_some();

        ClinicalTags {
            evidence_grade,
            recommendation_strength,
            is_recommendation,
        }
    }
}

/// Sentence-aware smaller chunks with guideline metadata
pub struct GuidelineProcessor {
    chunking: ChunkingConfig,
    tagger: ClinicalTagger,
}

impl GuidelineProcessor {
    pub fn new(chunking: ChunkingConfig) -> Result<Self> {
        Ok(Self {
            chunking,
            tagger: ClinicalTagger::new()?,
        })
    }
}

impl DocumentProcessor for GuidelineProcessor {
    fn process(&self, document: &Document, pages: &[PageText]) -> Result<Vec<Node>> {
        let guideline = match document.clinical_metadata() {
            Some(Ok(guideline)) => Some(guideline),
            Some(Err(e)) => {
                warn!(document_id = %document.id, error = %e, "Malformed guideline metadata, indexing without it");
                None
            }
            None => None,
        };
        let title = build_title_for_document(document);

        let mut nodes = Vec::new();
        let mut chunk_index = 0;
        let mut recommendations = 0usize;
        for page in pages {
            for chunk in chunk_text(&page.text, &self.chunking)? {
                let mut metadata = base_metadata(document, page.page_number, chunk_index);
                metadata.insert("guideline_title".to_string(), Value::String(title.clone()));
                if let Some(guideline) = &guideline {
                    metadata.insert(
                        "issuing_org".to_string(),
                        Value::String(guideline.issuing_organization.clone()),
                    );
                    if let Some(date) = guideline.publication_date() {
                        metadata.insert(
                            "publication_date".to_string(),
                            Value::String(date.format("%Y-%m-%d").to_string()),
                        );
                    }
                }

                let tags = self.tagger.tag(&chunk.content);
                if let Some(grade) = tags.evidence_grade {
                    metadata.insert(
                        "evidence_grade".to_string(),
                        Value::String(grade.as_str().to_string()),
                    );
                }
                if let Some(strength) = tags.recommendation_strength {
                    metadata.insert("recommendation_strength".to_string(), Value::String(strength));
                }
                metadata.insert("is_recommendation".to_string(), Value::Bool(tags.is_recommendation));
                if tags.is_recommendation {
                    recommendations += 1;
                }

                nodes.push(Node::new(document.id, chunk.content, metadata));
                chunk_index += 1;
            }
        }

        debug!(
            document_id = %document.id,
            nodes = nodes.len(),
            recommendations,
            "Clinical guideline processed"
        );
        Ok(nodes)
    }
}
