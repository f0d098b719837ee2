//! Core data models used throughout the study pipeline.
//!
//! These types represent the documents, passages, learning items and chat
//! turns that flow from ingestion through generation into a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::StudyError;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Text,
    Word,
    Markdown,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 4] = [
        DocumentFormat::Pdf,
        DocumentFormat::Text,
        DocumentFormat::Word,
        DocumentFormat::Markdown,
    ];

    /// Resolves a declared format: a short name, a file extension or a MIME type.
    pub fn from_declared(declared: &str) -> Result<Self, StudyError> {
        let normalized = declared.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "pdf" | "application/pdf" => Ok(DocumentFormat::Pdf),
            "text" | "txt" | "text/plain" => Ok(DocumentFormat::Text),
            "word" | "docx" | crate::extract::MIME_DOCX => Ok(DocumentFormat::Word),
            "markdown" | "md" | "text/markdown" => Ok(DocumentFormat::Markdown),
            _ => Err(StudyError::UnsupportedFormat(declared.to_string())),
        }
    }

    /// Resolves a format from a filename's extension.
    pub fn from_filename(filename: &str) -> Result<Self, StudyError> {
        let ext = std::path::Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .ok_or_else(|| StudyError::UnsupportedFormat(filename.to_string()))?;
        Self::from_declared(&ext).map_err(|_| StudyError::UnsupportedFormat(filename.to_string()))
    }

    /// Canonical file extension, used when storing uploads.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Text => "txt",
            DocumentFormat::Word => "docx",
            DocumentFormat::Markdown => "md",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => crate::extract::MIME_PDF,
            DocumentFormat::Text => "text/plain",
            DocumentFormat::Word => crate::extract::MIME_DOCX,
            DocumentFormat::Markdown => "text/markdown",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Text => "text",
            DocumentFormat::Word => "word",
            DocumentFormat::Markdown => "markdown",
        };
        f.write_str(name)
    }
}

/// An ingested upload. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub uploaded_at: DateTime<Utc>,
    /// Where the raw bytes were written.
    pub raw_path: PathBuf,
    pub text: String,
    pub hash: String,
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A query hit returned by [`Index::query`](crate::index::Index::query).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassageHit {
    pub passage_id: String,
    pub document_id: String,
    pub filename: String,
    pub score: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub section: String,
    pub topic: String,
    pub narration: String,
    pub bullets: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideDeck {
    pub topic: String,
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub number: usize,
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_answer: String,
    pub rationale: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Self-assessed or quiz-assessed knowledge level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnowledgeLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for KnowledgeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KnowledgeLevel::Beginner => "Beginner",
            KnowledgeLevel::Intermediate => "Intermediate",
            KnowledgeLevel::Advanced => "Advanced",
        };
        f.write_str(name)
    }
}
