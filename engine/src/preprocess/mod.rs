//! Document Preprocessor
//!
//! Turns an uploaded file into a size-capped text excerpt that can be attached
//! to a `Request`. Only plain text is decoded here; PDF and Office formats are
//! recognised by their magic bytes and rejected with an `Extraction` error.

use crate::config::PipelineConfig;
use sdk::errors::PipelineError;
use sdk::DocumentExcerpt;

/// Source of document text
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<String, PipelineError>;
}

/// File format sniffed from content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    /// Zip container: docx, xlsx, pptx
    OfficeOpenXml,
    /// OLE compound file: doc, xls
    LegacyOffice,
    Text,
}

impl DocumentKind {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            Self::Pdf
        } else if bytes.starts_with(b"PK") {
            Self::OfficeOpenXml
        } else if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            Self::LegacyOffice
        } else {
            Self::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::OfficeOpenXml => "office open xml",
            Self::LegacyOffice => "legacy office",
            Self::Text => "text",
        }
    }
}

/// Plain-text extractor with size limits
#[derive(Debug, Clone)]
pub struct TextExtractor {
    max_bytes: usize,
    max_chars: usize,
}

impl TextExtractor {
    pub fn new(max_bytes: usize, max_chars: usize) -> Self {
        Self {
            max_bytes,
            max_chars,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_document_bytes, config.max_document_chars)
    }

    /// Extract and wrap as an excerpt ready to attach to a request
    pub fn extract_excerpt(
        &self,
        name: &str,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<DocumentExcerpt, PipelineError> {
        let text = self.extract(bytes, mime_type)?;
        let (text, truncated) = truncate_chars(text, self.max_chars);
        if truncated {
            tracing::warn!(document = name, max_chars = self.max_chars, "Document text truncated");
        }

        Ok(DocumentExcerpt {
            name: name.to_string(),
            mime_type: mime_type.map(str::to_string),
            text,
            truncated,
        })
    }
}

impl DocumentExtractor for TextExtractor {
    fn extract(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<String, PipelineError> {
        if bytes.len() > self.max_bytes {
            return Err(PipelineError::Extraction(format!(
                "file is too large ({:.1} MiB, limit {:.1} MiB)",
                bytes.len() as f64 / 1024.0 / 1024.0,
                self.max_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        match DocumentKind::detect(bytes) {
            DocumentKind::Text => Ok(decode_text(bytes)),
            kind => Err(PipelineError::Extraction(format!(
                "{} documents are not supported (mime type: {})",
                kind.as_str(),
                mime_type.unwrap_or("unknown")
            ))),
        }
    }
}

/// UTF-8, falling back to Latin-1 which maps every byte
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text, false);
    }

    let mut kept: String = text.chars().take(max_chars).collect();
    kept.push_str(&format!(
        "\n\n[Content truncated: kept {} of {} characters]",
        max_chars, total
    ));
    (kept, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_magic_bytes() {
        assert_eq!(DocumentKind::detect(b"%PDF-1.7"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::detect(b"PK\x03\x04"), DocumentKind::OfficeOpenXml);
        assert_eq!(
            DocumentKind::detect(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1]),
            DocumentKind::LegacyOffice
        );
        assert_eq!(DocumentKind::detect(b"hello"), DocumentKind::Text);
        assert_eq!(DocumentKind::detect(b""), DocumentKind::Text);
    }

    #[test]
    fn test_latin1_fallback() {
        let extractor = TextExtractor::new(1024, 1024);
        let text = extractor.extract(&[0x63, 0x61, 0x66, 0xE9], None).unwrap();
        assert_eq!(text, "café");
    }

    #[test]
    fn test_binary_formats_rejected() {
        let extractor = TextExtractor::new(1024, 1024);
        let err = extractor
            .extract(b"%PDF-1.4 ...", Some("application/pdf"))
            .unwrap_err();
        assert_eq!(err.kind(), "extraction_error");
        assert!(err.to_string().contains("pdf"));
    }

    #[test]
    fn test_oversized_input_rejected() {
        let extractor = TextExtractor::new(4, 1024);
        assert!(extractor.extract(b"too long", None).is_err());
    }

    #[test]
    fn test_excerpt_is_truncated_with_note() {
        let extractor = TextExtractor::new(1024, 5);
        let excerpt = extractor
            .extract_excerpt("notes.txt", "abcdefghij".as_bytes(), Some("text/plain"))
            .unwrap();
        assert!(excerpt.truncated);
        assert!(excerpt.text.starts_with("abcde\n\n[Content truncated"));
        assert_eq!(excerpt.mime_type.as_deref(), Some("text/plain"));
    }
}
