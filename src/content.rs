//! Content extraction capability.
//!
//! File parsing (PDF, DOCX, ...) is an external collaborator; the executor
//! only depends on this trait. The built-in extractor handles text-like
//! content and refuses everything else, leaving richer parsers to plug in
//! behind the same seam.

use anyhow::{bail, Result};
use async_trait::async_trait;

#[async_trait]
pub trait ContentExtractor: Send + Sync + 'static {
    /// Extracts plain text from stored document bytes.
    async fn extract(&self, content_type: &str, bytes: &[u8]) -> Result<String>;

    fn supports(&self, content_type: &str) -> bool;
}

pub struct PlainTextExtractor;

const TEXT_TYPES: &[&str] = &["text/plain", "text/markdown", "text/csv", "application/json"];

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    async fn extract(&self, content_type: &str, bytes: &[u8]) -> Result<String> {
        if !self.supports(content_type) {
            bail!("unsupported content type: {}", content_type);
        }

        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Ok(text),
            Err(_) => bail!("document bytes are not valid UTF-8"),
        }
    }

    fn supports(&self, content_type: &str) -> bool {
        let base = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        TEXT_TYPES.contains(&base) || base.starts_with("text/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extracts_utf8_text() {
        let extractor = PlainTextExtractor::new();
        let text = extractor
            .extract("text/plain; charset=utf-8", "hello world".as_bytes())
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_rejects_binary_types() {
        let extractor = PlainTextExtractor::new();
        assert!(!extractor.supports("application/pdf"));
        assert!(extractor
            .extract("application/pdf", &[0x25, 0x50])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rejects_invalid_utf8() {
        let extractor = PlainTextExtractor::new();
        assert!(extractor
            .extract("text/plain", &[0xff, 0xfe, 0x00])
            .await
            .is_err());
    }
}
