//! Category metadata schemas

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SEC filing form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecDocType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
}

impl fmt::Display for SecDocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecDocType::TenK => f.write_str("10-K"),
            SecDocType::TenQ => f.write_str("10-Q"),
        }
    }
}

/// Metadata stored under the `sec_document` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecDocumentMetadata {
    pub company_name: String,
    pub company_ticker: String,
    pub doc_type: SecDocType,
    pub year: i32,
    #[serde(default)]
    pub quarter: Option<u8>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub period_of_report_date: Option<String>,
    #[serde(default)]
    pub filed_as_of_date: Option<String>,
    #[serde(default)]
    pub date_as_of_change: Option<String>,
}

impl SecDocumentMetadata {
    /// "2023 Q2" for quarterly filings, "2023" otherwise
    pub fn time_period(&self) -> String {
        match self.quarter {
            Some(q) => format!("{} Q{}", self.year, q),
            None => self.year.to_string(),
        }
    }
}

/// Evidence grade labels used across grading systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceGrade {
    A,
    B,
    C,
    D,
    I,
    #[serde(rename = "GPP")]
    GoodPractice,
    #[serde(rename = "EO")]
    ExpertOpinion,
    #[serde(rename = "NG")]
    NotGraded,
}

impl EvidenceGrade {
    /// Parse a grade label as it appears in guideline text
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "A" => Some(EvidenceGrade::A),
            "B" => Some(EvidenceGrade::B),
            "C" => Some(EvidenceGrade::C),
            "D" => Some(EvidenceGrade::D),
            "I" => Some(EvidenceGrade::I),
            "GPP" => Some(EvidenceGrade::GoodPractice),
            "EO" => Some(EvidenceGrade::ExpertOpinion),
            "NG" => Some(EvidenceGrade::NotGraded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceGrade::A => "A",
            EvidenceGrade::B => "B",
            EvidenceGrade::C => "C",
            EvidenceGrade::D => "D",
            EvidenceGrade::I => "I",
            EvidenceGrade::GoodPractice => "GPP",
            EvidenceGrade::ExpertOpinion => "EO",
            EvidenceGrade::NotGraded => "NG",
        }
    }
}

/// Metadata stored under the `clinical_guideline` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalGuidelineMetadata {
    pub title: String,
    pub issuing_organization: String,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub target_population: Option<String>,
    #[serde(default)]
    pub evidence_grading_system: Option<String>,
    #[serde(default)]
    pub recommendation_count: Option<u32>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub next_review: Option<String>,
    #[serde(default)]
    pub guideline_id: Option<String>,
}

impl ClinicalGuidelineMetadata {
    /// Publication date, accepting `YYYY-MM-DD` or RFC 3339 timestamps
    pub fn publication_date(&self) -> Option<NaiveDate> {
        self.publication_date.as_deref().and_then(parse_flexible_date)
    }

    pub fn publication_year(&self) -> Option<i32> {
        self.publication_date().map(|d| d.year())
    }
}

fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            // "2019-08-28T00:00:00" without offset
            raw.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_period() {
        let mut sec = SecDocumentMetadata {
            company_name: "Uber".into(),
            company_ticker: "UBER".into(),
            doc_type: SecDocType::TenK,
            year: 2022,
            quarter: None,
            accession_number: None,
            cik: None,
            period_of_report_date: None,
            filed_as_of_date: None,
            date_as_of_change: None,
        };
        assert_eq!(sec.time_period(), "2022");
        sec.quarter = Some(3);
        assert_eq!(sec.time_period(), "2022 Q3");
    }

    #[test]
    fn test_flexible_dates() {
        assert_eq!(parse_flexible_date("2021-03-04").map(|d| d.year()), Some(2021));
        assert_eq!(
            parse_flexible_date("2020-01-01T10:00:00+00:00").map(|d| d.year()),
            Some(2020)
        );
        assert_eq!(parse_flexible_date("2018-05-06T00:00:00").map(|d| d.year()), Some(2018));
        assert_eq!(parse_flexible_date("sometime"), None);
    }

    #[test]
    fn test_evidence_grade_labels() {
        assert_eq!(EvidenceGrade::from_label("gpp"), Some(EvidenceGrade::GoodPractice));
        assert_eq!(EvidenceGrade::from_label(" B "), Some(EvidenceGrade::B));
        assert_eq!(EvidenceGrade::from_label("Z"), None);
        assert_eq!(EvidenceGrade::ExpertOpinion.as_str(), "EO");
    }
}
