//! Per-category behaviour table
//!
//! Every category-dependent decision (embedding model, chunking, retrieval
//! depth, tool groups, synthesis style) is read from here rather than
//! branched on ad hoc.

use crate::chunker::ChunkingConfig;
use docchat_common::config::EmbeddingConfig;
use docchat_common::documents::DocumentCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level tool groups exposed to the chat agent.
///
/// Declaration order is the priority order used to break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolGroup {
    ClinicalGuidelines,
    QuantitativeFinancial,
    QualitativeFinancial,
    General,
}

impl ToolGroup {
    /// All groups in priority order
    pub const PRIORITY: [ToolGroup; 4] = [
        ToolGroup::ClinicalGuidelines,
        ToolGroup::QuantitativeFinancial,
        ToolGroup::QualitativeFinancial,
        ToolGroup::General,
    ];

    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolGroup::ClinicalGuidelines => "clinical_guideline_engine",
            ToolGroup::QuantitativeFinancial => "quantitative_question_engine",
            ToolGroup::QualitativeFinancial => "qualitative_question_engine",
            ToolGroup::General => "document_question_engine",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolGroup::ClinicalGuidelines => {
                "A query engine that can answer questions about the clinical practice guidelines \
                 the user pre-selected for the conversation. Any questions about recommendations, \
                 evidence grades, dosing, diagnosis, treatment or patient populations should be asked here."
            }
            ToolGroup::QuantitativeFinancial => {
                "A query engine that can answer quantitative questions about a set of SEC financial \
                 documents that the user pre-selected for the conversation. Any questions about \
                 company-related financials, revenue, income, margins, cash, debt or other metrics \
                 should be asked here."
            }
            ToolGroup::QualitativeFinancial => {
                "A query engine that can answer qualitative questions about a set of SEC financial \
                 documents that the user pre-selected for the conversation. Any questions about \
                 company-related headwinds, tailwinds, risks, sentiments, strategy or administrative \
                 information should be asked here."
            }
            ToolGroup::General => {
                "A query engine that can answer questions about the uncategorised documents the \
                 user pre-selected for the conversation. Questions that are not about SEC filings \
                 or clinical guidelines should be asked here."
            }
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|g| g.tool_name() == name)
    }
}

impl fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// Prompting style of a document's synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynthesisKind {
    Financial,
    Quantitative,
    Clinical,
    General,
}

/// Everything that varies by document category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryProfile {
    pub category: DocumentCategory,
    pub embedding_model: String,
    pub chunking: ChunkingConfig,
    pub similarity_top_k: usize,
    /// Groups a document of this category contributes a tool to, with the
    /// synthesis style its tool uses inside that group
    pub tool_groups: Vec<(ToolGroup, SynthesisKind)>,
}

/// The full category table
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryProfiles {
    profiles: Vec<CategoryProfile>,
}

impl CategoryProfiles {
    /// Build the table using the embedding models from configuration
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::with_models(&config.financial_model, &config.clinical_model)
    }

    pub fn with_models(financial_model: &str, clinical_model: &str) -> Self {
        Self {
            profiles: vec![
                CategoryProfile {
                    category: DocumentCategory::SecFiling,
                    embedding_model: financial_model.to_string(),
                    chunking: ChunkingConfig::new(1024, 20),
                    similarity_top_k: 3,
                    tool_groups: vec![
                        (ToolGroup::QualitativeFinancial, SynthesisKind::Financial),
                        (ToolGroup::QuantitativeFinancial, SynthesisKind::Quantitative),
                    ],
                },
                CategoryProfile {
                    category: DocumentCategory::ClinicalGuideline,
                    embedding_model: clinical_model.to_string(),
                    chunking: ChunkingConfig::new(512, 50),
                    similarity_top_k: 5,
                    tool_groups: vec![(ToolGroup::ClinicalGuidelines, SynthesisKind::Clinical)],
                },
                CategoryProfile {
                    category: DocumentCategory::General,
                    embedding_model: financial_model.to_string(),
                    chunking: ChunkingConfig::new(1024, 20),
                    similarity_top_k: 3,
                    tool_groups: vec![(ToolGroup::General, SynthesisKind::General)],
                },
            ],
        }
    }

    /// Profile for a category. Falls back to the general profile.
    pub fn get(&self, category: DocumentCategory) -> &CategoryProfile {
        self.profiles
            .iter()
            .find(|p| p.category == category)
            .or_else(|| self.profiles.iter().find(|p| p.category == DocumentCategory::General))
            .unwrap_or(&self.profiles[0])
    }

    /// Replace a category's profile
    pub fn set(&mut self, profile: CategoryProfile) {
        self.profiles.retain(|p| p.category != profile.category);
        self.profiles.push(profile);
    }

    /// Distinct embedding models referenced by the table
    pub fn embedding_models(&self) -> Vec<String> {
        let mut models: Vec<String> =
            self.profiles.iter().map(|p| p.embedding_model.clone()).collect();
        models.sort();
        models.dedup();
        models
    }
}

impl Default for CategoryProfiles {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let profiles = CategoryProfiles::default();
        let clinical = profiles.get(DocumentCategory::ClinicalGuideline);
        assert_eq!(clinical.embedding_model, "text-embedding-3-large");
        assert_eq!(clinical.similarity_top_k, 5);
        assert_eq!(clinical.chunking.chunk_size_tokens, 512);

        let sec = profiles.get(DocumentCategory::SecFiling);
        assert_eq!(sec.embedding_model, "text-embedding-ada-002");
        assert_eq!(sec.similarity_top_k, 3);
        assert_eq!(sec.tool_groups.len(), 2);

        assert_eq!(
            profiles.embedding_models(),
            vec!["text-embedding-3-large", "text-embedding-ada-002"]
        );
    }

    #[test]
    fn test_group_names_round_trip_and_priority() {
        for group in ToolGroup::PRIORITY {
            assert_eq!(ToolGroup::from_tool_name(group.tool_name()), Some(group));
        }
        assert!(ToolGroup::ClinicalGuidelines < ToolGroup::General);
        assert_eq!(ToolGroup::from_tool_name("nope"), None);
    }

    #[test]
    fn test_set_overrides_profile() {
        let mut profiles = CategoryProfiles::default();
        let mut general = profiles.get(DocumentCategory::General).clone();
        general.similarity_top_k = 7;
        profiles.set(general);
        assert_eq!(profiles.get(DocumentCategory::General).similarity_top_k, 7);
    }
}
