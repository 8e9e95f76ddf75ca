//! Input documents and the text-extraction collaborator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported media type '{media_type}' for '{filename}'")]
    UnsupportedMediaType { filename: String, media_type: String },

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document '{0}' contains no text")]
    Empty(String),

    #[error("Text extraction failed: {0}")]
    Other(String),
}

/// A user-supplied document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub filename: String,
    /// Where the content lives, e.g. a file path.
    pub location: String,
    /// MIME type, e.g. "text/plain".
    pub media_type: Option<String>,
}

impl DocumentDescriptor {
    /// Creates a descriptor, guessing the media type from the filename.
    pub fn new(filename: impl Into<String>, location: impl Into<String>) -> Self {
        let filename = filename.into();
        let media_type = Self::detect_media_type(Path::new(&filename));
        Self {
            filename,
            location: location.into(),
            media_type,
        }
    }

    /// Descriptor for a local file; the filename is taken from the path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(filename, path.to_string_lossy().to_string())
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Returns `None` for unknown extensions.
    fn detect_media_type(path: &Path) -> Option<String> {
        mime_guess::from_path(path).first().map(|m| m.to_string())
    }
}

/// Turns a document into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, document: &DocumentDescriptor) -> Result<String, ExtractError>;
}

/// Reads UTF-8 text files from the local filesystem.
///
/// Documents with a known non-text media type are rejected; documents with
/// no media type are read as text.
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn is_text(media_type: &str) -> bool {
        media_type.starts_with("text/")
            || matches!(
                media_type,
                "application/json" | "application/xml" | "application/x-yaml" | "application/yaml"
            )
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, document: &DocumentDescriptor) -> Result<String, ExtractError> {
        if let Some(media_type) = document.media_type.as_deref() {
            if !Self::is_text(media_type) {
                return Err(ExtractError::UnsupportedMediaType {
                    filename: document.filename.clone(),
                    media_type: media_type.to_string(),
                });
            }
        }

        let path = PathBuf::from(&document.location);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ExtractError::ReadDocument { path, source })?;

        if text.trim().is_empty() {
            return Err(ExtractError::Empty(document.filename.clone()));
        }
        Ok(text)
    }
}
