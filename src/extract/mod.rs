// Text extraction
// Turns uploaded files into plain text ready for chunking


use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Source of document text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from a file. A missing file yields empty text.
    async fn extract_file(&self, path: &Path) -> Result<String>;

    /// Extract text from raw document bytes
    fn extract_bytes(&self, bytes: &[u8]) -> Result<String>;
}

/// Reads UTF-8 text files as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_file(&self, path: &Path) -> Result<String> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} does not exist, treating it as empty", path.display());
                return Ok(String::new());
            }
            Err(e) => {
                return Err(RagError::Extraction(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let text = self
            .extract_bytes(&bytes)
            .map_err(|e| RagError::Extraction(format!("{}: {}", path.display(), e)))?;
        debug!(
            "Extracted {} chars from {}",
            text.chars().count(),
            path.display()
        );
        Ok(text)
    }

    fn extract_bytes(&self, bytes: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RagError::Extraction(format!("Document is not valid UTF-8: {}", e)))?;

        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Ok(text.replace("\r\n", "\n").trim().to_string())
    }
}
