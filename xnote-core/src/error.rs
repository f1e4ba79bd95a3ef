//! Error types for the XNote core
//!
//! All errors use thiserror for structured error handling.
//! User-facing export/import outcomes are reported through
//! `ExportResult` / `ImportResult` instead of these errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Generic(String),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
