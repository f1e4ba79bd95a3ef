//! Validation of untrusted archives
//!
//! Incoming ZIP files are inspected before anything is extracted: total
//! size, entry count, entry names, per-entry compression ratio and the
//! total uncompressed size. Entry metadata is read without decrypting,
//! so password-protected archives can be checked before the password is
//! known.

use crate::config::{
    ALLOWED_EXTENSIONS, FORBIDDEN_FILENAME_CHARS, MAX_COMPRESSION_RATIO, MAX_ENTRY_COUNT,
    MAX_FILENAME_LENGTH, MAX_PATH_DEPTH, MAX_UNCOMPRESSED_SIZE, MAX_ZIP_SIZE,
};
use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

/// Characters replaced by `_` when an entry name becomes a file name
const UNSAFE_PATH_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Outcome of a validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    fn invalid(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!("Validation rejected input: {}", reason);
        ValidationResult::Invalid(reason)
    }
}

/// Archive and file name checks
pub struct SecureFileValidator;

impl SecureFileValidator {
    /// Validate a ZIP archive on disk. The first violation wins.
    pub fn validate_zip_file(path: &Path) -> ValidationResult {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => return ValidationResult::invalid(format!("Cannot read archive: {}", e)),
        };

        if size > MAX_ZIP_SIZE {
            return ValidationResult::invalid(format!(
                "Archive too large: {} bytes (max {})",
                size, MAX_ZIP_SIZE
            ));
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => return ValidationResult::invalid(format!("Cannot open archive: {}", e)),
        };

        let mut archive = match ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(e) => return ValidationResult::invalid(format!("Not a valid ZIP archive: {}", e)),
        };

        if archive.len() > MAX_ENTRY_COUNT {
            return ValidationResult::invalid(format!(
                "Too many entries: {} (max {})",
                archive.len(),
                MAX_ENTRY_COUNT
            ));
        }

        let mut seen = HashSet::new();
        let mut total_uncompressed: u64 = 0;

        for index in 0..archive.len() {
            let entry = match archive.by_index_raw(index) {
                Ok(entry) => entry,
                Err(e) => {
                    return ValidationResult::invalid(format!("Unreadable entry {}: {}", index, e))
                }
            };

            let name = entry.name().to_string();

            if let ValidationResult::Invalid(reason) = Self::validate_file_name(&name) {
                return ValidationResult::Invalid(reason);
            }

            let normalized = name.replace('\\', "/").to_lowercase();
            if !seen.insert(normalized) {
                return ValidationResult::invalid(format!("Duplicate entry: {}", name));
            }

            let uncompressed = entry.size();
            let compressed = entry.compressed_size();
            if compressed > 0 {
                let ratio = uncompressed as f64 / compressed as f64;
                if ratio > MAX_COMPRESSION_RATIO {
                    return ValidationResult::invalid(format!(
                        "Suspicious compression ratio {:.1} for {}",
                        ratio, name
                    ));
                }
            }

            total_uncompressed = total_uncompressed.saturating_add(uncompressed);
            if total_uncompressed > MAX_UNCOMPRESSED_SIZE {
                return ValidationResult::invalid(format!(
                    "Uncompressed size exceeds {} bytes",
                    MAX_UNCOMPRESSED_SIZE
                ));
            }
        }

        tracing::debug!(
            "Archive {:?} passed validation ({} entries, {} bytes uncompressed)",
            path,
            archive.len(),
            total_uncompressed
        );
        ValidationResult::Valid
    }

    /// Validate a single entry name
    pub fn validate_file_name(name: &str) -> ValidationResult {
        if name.is_empty() {
            return ValidationResult::invalid("Empty entry name");
        }

        if name.chars().count() > MAX_FILENAME_LENGTH {
            return ValidationResult::invalid(format!("Entry name too long: {}", name.len()));
        }

        if name.contains("..") || name.starts_with('/') || name.starts_with('\\') {
            return ValidationResult::invalid(format!("Path traversal in entry name: {}", name));
        }

        if let Some(c) = name.chars().find(|c| FORBIDDEN_FILENAME_CHARS.contains(c)) {
            return ValidationResult::invalid(format!(
                "Forbidden character {:?} in entry name: {}",
                c, name
            ));
        }

        let segments: Vec<&str> = name
            .split(|c: char| c == '/' || c == '\\')
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() > MAX_PATH_DEPTH {
            return ValidationResult::invalid(format!("Entry path too deep: {}", name));
        }

        if let Some(last) = segments.last() {
            if let Some((_, ext)) = last.rsplit_once('.') {
                let ext = ext.to_lowercase();
                if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
                    return ValidationResult::invalid(format!(
                        "File type not allowed: {}",
                        name
                    ));
                }
            }
        }

        ValidationResult::Valid
    }

    /// Reject files larger than `max_bytes`
    pub fn validate_file_size(path: &Path, max_bytes: u64) -> ValidationResult {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > max_bytes => ValidationResult::invalid(format!(
                "File {:?} too large: {} bytes (max {})",
                path,
                meta.len(),
                max_bytes
            )),
            Ok(_) => ValidationResult::Valid,
            Err(e) => ValidationResult::invalid(format!("Cannot read {:?}: {}", path, e)),
        }
    }

    /// Build the extraction target for an entry name.
    ///
    /// Separators and reserved characters are flattened to `_`, so every
    /// entry lands directly in `base`. The result must lie strictly
    /// inside `base`.
    pub fn create_secure_extract_path(base: &Path, name: &str) -> Result<PathBuf> {
        let sanitized: String = name
            .chars()
            .map(|c| if UNSAFE_PATH_CHARS.contains(&c) { '_' } else { c })
            .collect();

        let base = normalize(base);
        let target = normalize(&base.join(&sanitized));

        if target == base || !target.starts_with(&base) {
            tracing::warn!("Blocked extraction path for entry {:?}", name);
            return Err(AppError::PathTraversal(name.to_string()));
        }

        Ok(target)
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching disk
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
