//! Error taxonomy for the study pipeline.
//!
//! Every operation reachable from the HTTP API or the CLI returns
//! [`StudyError`]. None of these are process-fatal: the server maps each
//! variant to an HTTP status (see [`StudyError::code`]) and stays up.

use thiserror::Error;

use crate::extract::ExtractError;

/// Errors surfaced by ingestion, indexing, generation and session handling.
#[derive(Debug, Error)]
pub enum StudyError {
    /// Declared upload format is not one of PDF, text, Word or Markdown.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file parsed badly or contained no text.
    #[error("text extraction failed for {filename}: {source}")]
    Extraction {
        filename: String,
        #[source]
        source: ExtractError,
    },

    /// The corpus could not be turned into an index, or a stored index is unreadable.
    #[error("index build failed: {0}")]
    IndexBuild(String),

    /// The LLM response could not be parsed into slides or quiz questions.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A stored session record is missing or corrupt.
    #[error("session load failed for {user_id}: {reason}")]
    SessionLoad { user_id: String, reason: String },

    #[error("invalid mode transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or provider failure talking to the LLM backend.
    #[error("llm request failed: {0}")]
    Llm(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StudyError {
    /// Machine-readable error code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            StudyError::UnsupportedFormat(_) => "unsupported_format",
            StudyError::Extraction { .. } => "extraction_failed",
            StudyError::IndexBuild(_) => "index_build",
            StudyError::Generation(_) => "generation",
            StudyError::SessionLoad { .. } => "session_load",
            StudyError::InvalidTransition { .. } => "invalid_transition",
            StudyError::InvalidInput(_) => "bad_request",
            StudyError::NotFound(_) => "not_found",
            StudyError::Llm(_) => "llm_unavailable",
            StudyError::Storage(_) => "internal",
        }
    }
}

impl From<std::io::Error> for StudyError {
    fn from(e: std::io::Error) -> Self {
        StudyError::Storage(e.to_string())
    }
}

impl From<sqlx::Error> for StudyError {
    fn from(e: sqlx::Error) -> Self {
        StudyError::Storage(e.to_string())
    }
}

pub type Result<T, E = StudyError> = std::result::Result<T, E>;
