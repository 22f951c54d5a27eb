//! Placeholder content extraction run by `process_document`.
//!
//! Real OCR is out of scope; the trait is the seam a real engine plugs into.

use crate::models::document::DocumentType;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("extraction failed: {0}")]
pub struct ExtractionError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// JSON object stored in `documents.extracted_data`.
    pub data: Value,
    pub text: Option<String>,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(
        &self,
        document_type: DocumentType,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Extraction, ExtractionError>;
}

/// Tags the category and pulls uncompressed text out of PDFs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderExtractor;

#[async_trait]
impl DocumentExtractor for PlaceholderExtractor {
    async fn extract(
        &self,
        document_type: DocumentType,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Extraction, ExtractionError> {
        let mut data = json!({
            "document_category": document_type.category(),
            "processed_at": Utc::now().to_rfc3339(),
        });

        let text = match content_type {
            "application/pdf" => pdf_text(bytes),
            _ => None,
        };

        if let (Some(text), Some(fields)) = (&text, data.as_object_mut()) {
            fields.insert("text_length".into(), json!(text.chars().count()));
            fields.insert("has_text".into(), json!(true));
        }
        Ok(Extraction { data, text })
    }
}

/// Text shown by `Tj`/`TJ` operators in uncompressed content streams.
pub fn pdf_text(bytes: &[u8]) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                let (literal, next) = read_literal(bytes, i + 1);
                pending.push(literal);
                i = next;
            }
            b'[' | b']' => i += 1,
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'(' | b'[' | b']')
                {
                    i += 1;
                }
                match &bytes[start..i] {
                    b"Tj" | b"TJ" => {
                        let line = pending.concat();
                        if !line.trim().is_empty() {
                            lines.push(line.trim().to_string());
                        }
                        pending.clear();
                    }
                    // Kerning offsets inside TJ arrays.
                    token if is_number(token) => {}
                    _ => pending.clear(),
                }
            }
        }
    }

    let text = lines.join("\n");
    (!text.is_empty()).then_some(text)
}

/// Reads a literal string body starting after `(`; returns it and the index
/// past the closing `)`.
fn read_literal(bytes: &[u8], mut i: usize) -> (String, usize) {
    let mut out = Vec::new();
    let mut depth = 1;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        match b {
            b'\\' if i < bytes.len() => {
                let escaped = bytes[i];
                i += 1;
                match escaped {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'\n' | b'\r' => {}
                    other => out.push(other),
                }
            }
            b'(' => {
                depth += 1;
                out.push(b);
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    (String::from_utf8_lossy(&out).into_owned(), i)
}

fn is_number(token: &[u8]) -> bool {
    !token.is_empty()
        && token
            .iter()
            .all(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Length 60 >> stream\nBT /F1 12 Tf 72 712 Td (Passport No. X123) Tj ET\n\
BT [(Given) -250 (Names)] TJ ET\nendstream endobj\n%%EOF";

    #[test]
    fn pulls_shown_text_from_pdfs() {
        assert_eq!(pdf_text(PDF).as_deref(), Some("Passport No. X123\nGivenNames"));
    }

    #[test]
    fn handles_escapes_and_nesting() {
        let text = pdf_text(b"BT (a \\(b\\) (c)) Tj ET").unwrap();
        assert_eq!(text, "a (b) (c)");
    }

    #[test]
    fn pdfs_without_text_yield_none() {
        assert!(pdf_text(b"%PDF-1.4\n%%EOF").is_none());
    }

    #[tokio::test]
    async fn tags_category_and_text_stats() {
        let extraction = PlaceholderExtractor
            .extract(DocumentType::Passport, "application/pdf", PDF)
            .await
            .unwrap();
        assert_eq!(extraction.data["document_category"], "identity");
        assert_eq!(extraction.data["has_text"], true);
        assert_eq!(
            extraction.data["text_length"],
            extraction.text.as_ref().unwrap().chars().count()
        );
    }

    #[tokio::test]
    async fn images_only_get_a_category() {
        let extraction = PlaceholderExtractor
            .extract(DocumentType::BankStatement, "image/png", b"\x89PNG")
            .await
            .unwrap();
        assert_eq!(extraction.data["document_category"], "financial");
        assert!(extraction.data.get("has_text").is_none());
        assert!(extraction.text.is_none());
    }
}
