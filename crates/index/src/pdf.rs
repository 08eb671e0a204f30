//! Document text extraction
//!
//! Extracts per-page text from PDF bytes using lopdf. Payloads that are not
//! PDFs are treated as UTF-8 text forming a single page.

use docchat_common::errors::{AppError, Result};
use tracing::{debug, warn};
use uuid::Uuid;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Text of one page, 1-based
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// Extract page texts from raw document bytes
pub fn extract_pages(doc_id: Uuid, bytes: &[u8]) -> Result<Vec<PageText>> {
    if !bytes.starts_with(PDF_MAGIC) {
        let text = clean_text(&String::from_utf8_lossy(bytes));
        if text.is_empty() {
            return Err(AppError::DocumentParse {
                doc_id: doc_id.to_string(),
                message: "document is empty".to_string(),
            });
        }
        return Ok(vec![PageText { page_number: 1, text }]);
    }

    let doc = lopdf::Document::load_mem(bytes).map_err(|e| AppError::DocumentParse {
        doc_id: doc_id.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    debug!(page_count = page_numbers.len(), "Extracting text from PDF");

    let mut pages = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        match doc.extract_text(&[page_number]) {
            Ok(raw) => {
                let text = clean_text(&raw);
                if !text.is_empty() {
                    pages.push(PageText { page_number, text });
                }
            }
            Err(e) => {
                warn!(page = page_number, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if pages.is_empty() {
        return Err(AppError::DocumentParse {
            doc_id: doc_id.to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }

    Ok(pages)
}

/// Collapse whitespace within lines, keep line breaks and reduce blank-line
/// runs to a single paragraph break, then normalise typographic quotes.
fn clean_text(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        } else if !lines.is_empty() {
            paragraphs.push(lines.join("\n"));
            lines.clear();
        }
    }
    if !lines.is_empty() {
        paragraphs.push(lines.join("\n"));
    }

    paragraphs
        .join("\n\n")
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let input = "Hello   World\r\n\n \n\n\u{201C}Test\u{201D}\t it\u{2019}s\nnext";
        assert_eq!(clean_text(input), "Hello World\n\n\"Test\" it's\nnext");
    }

    #[test]
    fn test_plain_text_is_single_page() {
        let pages = extract_pages(Uuid::new_v4(), b"Revenue grew 12%.\nMargins held.").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].text, "Revenue grew 12%.\nMargins held.");
    }

    #[test]
    fn test_paragraph_breaks_survive_extraction() {
        let pages = extract_pages(
            Uuid::new_v4(),
            b"Item 1A. Risk Factors.\n\nOur business faces competition.\n\n\n\nItem 7. MD&A.",
        )
        .unwrap();
        assert_eq!(
            pages[0].text,
            "Item 1A. Risk Factors.\n\nOur business faces competition.\n\nItem 7. MD&A."
        );
    }

    #[test]
    fn test_empty_and_broken_inputs() {
        assert!(matches!(
            extract_pages(Uuid::new_v4(), b"   \n"),
            Err(AppError::DocumentParse { .. })
        ));
        assert!(matches!(
            extract_pages(Uuid::new_v4(), b"%PDF-1.7 truncated garbage"),
            Err(AppError::DocumentParse { .. })
        ));
    }
}
