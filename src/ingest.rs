//! Document ingestion.
//!
//! Turns an uploaded file into a [`Document`]: resolve the declared format,
//! extract text, and store the raw bytes under
//! `<data_dir>/uploads/<user_id>/`. Format and extraction checks run before
//! anything touches disk, so a rejected upload leaves no file behind.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::error::{Result, StudyError};
use crate::extract::extract_text;
use crate::logging::{log_action, ActionKind};
use crate::models::{Document, DocumentFormat};

pub struct Ingestor {
    storage: StorageConfig,
}

impl Ingestor {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            storage: storage.clone(),
        }
    }

    /// Ingests one upload and stores its raw bytes.
    pub fn ingest(
        &self,
        user_id: &str,
        filename: &str,
        declared_format: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        let format = DocumentFormat::from_declared(declared_format)?;
        let stored_name = stored_filename(filename, format)?;
        let text = extract_text(bytes, format).map_err(|source| StudyError::Extraction {
            filename: stored_name.clone(),
            source,
        })?;

        let dir = self.storage.uploads_dir(user_id);
        std::fs::create_dir_all(&dir)?;
        let raw_path = dir.join(&stored_name);
        std::fs::write(&raw_path, bytes)?;

        let doc = make_document(&stored_name, format, bytes, text, raw_path, Utc::now());
        log_action(
            user_id,
            ActionKind::Upload,
            &format!("File '{}' uploaded ({}, {} bytes)", doc.filename, format, bytes.len()),
        );
        Ok(doc)
    }

    /// Ingests a local file, taking the format from its extension.
    pub fn ingest_path(&self, user_id: &str, path: &Path) -> Result<Document> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StudyError::InvalidInput(format!("not a file: {}", path.display())))?;
        let format = DocumentFormat::from_filename(&filename)?;
        let bytes = std::fs::read(path)?;
        self.ingest(user_id, &filename, format.extension(), &bytes)
    }

    /// Re-reads every stored upload for a user, sorted by filename.
    pub fn load_uploaded(&self, user_id: &str) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for path in self.list_uploads(user_id)? {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let format = match DocumentFormat::from_filename(&filename) {
                Ok(f) => f,
                Err(_) => {
                    tracing::warn!(user = %user_id, file = %filename, "skipping unrecognized upload");
                    continue;
                }
            };
            let bytes = std::fs::read(&path)?;
            let text = extract_text(&bytes, format).map_err(|source| StudyError::Extraction {
                filename: filename.clone(),
                source,
            })?;
            let uploaded_at = file_mtime(&path);
            docs.push(make_document(&filename, format, &bytes, text, path, uploaded_at));
        }
        Ok(docs)
    }

    /// Stored upload paths for a user, sorted. Missing directory yields none.
    pub fn list_uploads(&self, user_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.storage.uploads_dir(user_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StudyError::Storage(e.to_string()))?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Removes all stored uploads for a user.
    pub fn clear_uploads(&self, user_id: &str) -> Result<()> {
        let dir = self.storage.uploads_dir(user_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Final path component of the upload name, with the format's extension
/// appended when the name does not already carry a matching one.
fn stored_filename(filename: &str, format: DocumentFormat) -> Result<String> {
    let base = Path::new(filename.trim())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty() && n != "..")
        .ok_or_else(|| StudyError::InvalidInput(format!("invalid filename: {:?}", filename)))?;

    match DocumentFormat::from_filename(&base) {
        Ok(f) if f == format => Ok(base),
        _ => Ok(format!("{}.{}", base, format.extension())),
    }
}

fn make_document(
    filename: &str,
    format: DocumentFormat,
    bytes: &[u8],
    text: String,
    raw_path: PathBuf,
    uploaded_at: DateTime<Utc>,
) -> Document {
    let mut id_hasher = Sha256::new();
    id_hasher.update(filename.as_bytes());
    id_hasher.update([0u8]);
    id_hasher.update(bytes);
    let id = format!("{:x}", id_hasher.finalize());

    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));

    Document {
        id,
        filename: filename.to_string(),
        format,
        uploaded_at,
        raw_path,
        text,
        hash,
    }
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    let secs = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
