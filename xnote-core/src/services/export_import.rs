//! Export / import service
//!
//! Packages notes as ZIP archives (`notes.json` plus `media/<file>`),
//! optionally AES-256 encrypted with a user password, and restores them
//! from untrusted archives after validation.
//!
//! Outcomes are reported as [`ExportResult`] / [`ImportResult`]; the
//! public entry points never return `Err`.

pub mod manifest;

use crate::config::{
    DEFAULT_CATEGORY_ID, DEFAULT_MAX_FILE_SIZE, EXTRACT_TIMEOUT, MANIFEST_ENTRY,
    MAX_IMPORT_NOTES, MAX_MANIFEST_SIZE, MAX_UNCOMPRESSED_SIZE, MEDIA_ENTRY_PREFIX,
    MIN_PASSWORD_LENGTH,
};
use crate::database::{NewNote, Note, Repository};
use crate::error::{AppError, Result};
use crate::security::{SecureFileValidator, ValidationResult};
use crate::storage::{MediaStore, TempFileManager};
use chrono::Utc;
use manifest::{
    export_note, import_blocks, import_title, referenced_media_keys, ExportNote, MediaCheck,
    MediaPlan,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const PASSWORD_REQUIREMENTS: &str =
    "At least 8 characters, including an uppercase letter, a lowercase letter and a digit";

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of an export
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExportResult {
    Success {
        message: String,
        note_count: usize,
        warnings: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl ExportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Success { .. })
    }
}

/// Why an import failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportErrorKind {
    Validation,
    WrongPassword,
    MissingManifest,
    InvalidManifest,
    Io,
}

/// Outcome of an import
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ImportResult {
    Success {
        count: usize,
        message: String,
        warnings: Vec<String>,
    },
    Error {
        kind: ImportErrorKind,
        message: String,
    },
}

impl ImportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ImportResult::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ImportErrorKind> {
        match self {
            ImportResult::Error { kind, .. } => Some(*kind),
            ImportResult::Success { .. } => None,
        }
    }
}

/// Export password policy: length plus upper, lower and digit
pub fn validate_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LENGTH
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Human-readable export password policy
pub fn password_requirements() -> &'static str {
    PASSWORD_REQUIREMENTS
}

/// Import failure carried through the pipeline
#[derive(Debug)]
struct ImportFailure {
    kind: ImportErrorKind,
    message: String,
}

impl ImportFailure {
    fn new(kind: ImportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<AppError> for ImportFailure {
    fn from(err: AppError) -> Self {
        let kind = match err {
            AppError::PathTraversal(_) | AppError::Timeout(_) => ImportErrorKind::Validation,
            _ => ImportErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<std::io::Error> for ImportFailure {
    fn from(err: std::io::Error) -> Self {
        Self::new(ImportErrorKind::Io, err.to_string())
    }
}

/// Files pulled out of an archive
#[derive(Debug, Default)]
struct Extracted {
    manifest: Option<PathBuf>,
    /// `media/<name>` to extracted file
    media: Vec<(String, PathBuf)>,
}

/// Export media only when the file exists, has a supported type and
/// fits the per-file limit
struct ExportableMedia;

impl MediaCheck for ExportableMedia {
    fn check(&self, local_path: &str) -> std::result::Result<(), String> {
        let path = Path::new(local_path);
        if !path.is_file() {
            return Err("file missing".to_string());
        }
        if MediaStore::kind_for(local_path).is_none() {
            return Err("unsupported file type".to_string());
        }
        match SecureFileValidator::validate_file_size(path, DEFAULT_MAX_FILE_SIZE) {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(_) => Err("file too large".to_string()),
        }
    }
}

/// Export / import service
#[derive(Clone)]
pub struct ExportImportService {
    repo: Repository,
    media: MediaStore,
    temp: Arc<TempFileManager>,
    exports_dir: PathBuf,
}

impl ExportImportService {
    pub fn new(
        repo: Repository,
        media: MediaStore,
        temp: Arc<TempFileManager>,
        exports_dir: PathBuf,
    ) -> Self {
        Self {
            repo,
            media,
            temp,
            exports_dir,
        }
    }

    /// Write selected notes (all when `note_ids` is `None`) to `dest`
    pub async fn export_notes_to_user_location(
        &self,
        dest: &Path,
        note_ids: Option<&[String]>,
    ) -> ExportResult {
        self.export(dest, None, note_ids).await
    }

    /// Like [`Self::export_notes_to_user_location`], every entry AES-256 encrypted
    pub async fn export_notes_to_user_location_with_password(
        &self,
        dest: &Path,
        password: &str,
        note_ids: Option<&[String]>,
    ) -> ExportResult {
        if !validate_password(password) {
            tracing::warn!("Export password rejected by policy");
            return ExportResult::Error {
                message: format!("Password too weak. {}", PASSWORD_REQUIREMENTS),
            };
        }

        self.export(dest, Some(password), note_ids).await
    }

    /// Export every note into the app's `exports/` folder
    pub async fn export_notes_to_app_storage(&self, password: Option<&str>) -> ExportResult {
        if let Err(e) = tokio::fs::create_dir_all(&self.exports_dir).await {
            return ExportResult::Error {
                message: format!("Cannot create exports folder: {}", e),
            };
        }

        let file_name = format!("XNote_Export_{}.zip", Utc::now().format("%Y%m%d_%H%M%S"));
        let dest = self.exports_dir.join(file_name);

        match password {
            Some(password) => {
                self.export_notes_to_user_location_with_password(&dest, password, None)
                    .await
            }
            None => self.export_notes_to_user_location(&dest, None).await,
        }
    }

    async fn export(
        &self,
        dest: &Path,
        password: Option<&str>,
        note_ids: Option<&[String]>,
    ) -> ExportResult {
        tracing::info!(
            "Exporting notes to {:?} (encrypted: {})",
            dest,
            password.is_some()
        );

        match self.try_export(dest, password, note_ids).await {
            Ok((note_count, warnings)) => {
                tracing::info!(
                    "Exported {} notes to {:?} ({} warnings)",
                    note_count,
                    dest,
                    warnings.len()
                );
                ExportResult::Success {
                    message: format!("Exported {} notes to {}", note_count, dest.display()),
                    note_count,
                    warnings,
                }
            }
            Err(e) => {
                tracing::error!("Export failed: {}", e);
                ExportResult::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn try_export(
        &self,
        dest: &Path,
        password: Option<&str>,
        note_ids: Option<&[String]>,
    ) -> Result<(usize, Vec<String>)> {
        let notes = self.select_notes(note_ids).await?;
        if notes.is_empty() {
            return Err(AppError::Export("No notes to export".to_string()));
        }

        let mut plan = MediaPlan::default();
        let mut warnings = Vec::new();
        let exported: Vec<ExportNote> = notes
            .iter()
            .map(|note| export_note(note, &mut plan, &ExportableMedia, &mut warnings))
            .collect();

        let manifest_json = serde_json::to_vec_pretty(&exported)?;
        let media_entries = plan.entries().to_vec();

        match password {
            None => {
                let target = dest.to_path_buf();
                run_blocking(move || {
                    write_archive(&target, &manifest_json, &media_entries, None)
                })
                .await?;
            }
            Some(password) => {
                let staging = self.temp.create_secure_temp_file("export", ".zip")?;
                let target = staging.clone();
                let password = password.to_string();

                let written = async {
                    run_blocking(move || {
                        write_archive(&target, &manifest_json, &media_entries, Some(password.as_str()))
                    })
                    .await?;
                    tokio::fs::copy(&staging, dest).await?;
                    Ok::<(), AppError>(())
                }
                .await;

                self.discard(&staging, false).await;
                written?;
            }
        }

        Ok((notes.len(), warnings))
    }

    async fn select_notes(&self, note_ids: Option<&[String]>) -> Result<Vec<Note>> {
        let mut notes = self.repo.list_notes().await?;

        if let Some(ids) = note_ids {
            notes.retain(|note| ids.contains(&note.id));
        }

        // Oldest first so the manifest reads chronologically
        notes.sort_by_key(|note| note.created_at);
        Ok(notes)
    }

    /// Import notes from an unencrypted archive
    pub async fn import_notes(&self, source: &Path, replace_existing: bool) -> ImportResult {
        self.import(source, None, replace_existing).await
    }

    /// Import notes from an AES-encrypted archive
    pub async fn import_notes_with_password(
        &self,
        source: &Path,
        password: &str,
        replace_existing: bool,
    ) -> ImportResult {
        self.import(source, Some(password), replace_existing).await
    }

    async fn import(
        &self,
        source: &Path,
        password: Option<&str>,
        replace_existing: bool,
    ) -> ImportResult {
        tracing::info!(
            "Importing notes from {:?} (encrypted: {}, replace: {})",
            source,
            password.is_some(),
            replace_existing
        );

        let staged = match self.temp.create_secure_temp_file("import", ".zip") {
            Ok(path) => path,
            Err(e) => {
                return ImportResult::Error {
                    kind: ImportErrorKind::Io,
                    message: e.to_string(),
                }
            }
        };

        let mut extract_dir = None;
        let outcome = self
            .try_import(source, &staged, &mut extract_dir, password, replace_existing)
            .await;

        self.discard(&staged, false).await;
        if let Some(dir) = extract_dir {
            self.discard(&dir, true).await;
        }

        match outcome {
            Ok((count, warnings)) => {
                let message = if replace_existing {
                    format!("Replaced existing notes with {} imported notes", count)
                } else {
                    format!("Imported {} notes", count)
                };
                tracing::info!("{} ({} warnings)", message, warnings.len());
                ImportResult::Success {
                    count,
                    message,
                    warnings,
                }
            }
            Err(failure) => {
                tracing::error!("Import failed ({:?}): {}", failure.kind, failure.message);
                ImportResult::Error {
                    kind: failure.kind,
                    message: failure.message,
                }
            }
        }
    }

    async fn try_import(
        &self,
        source: &Path,
        staged: &Path,
        extract_dir: &mut Option<PathBuf>,
        password: Option<&str>,
        replace_existing: bool,
    ) -> std::result::Result<(usize, Vec<String>), ImportFailure> {
        tokio::fs::copy(source, staged).await?;

        let archive_path = staged.to_path_buf();
        let validation = run_blocking(move || {
            Ok(SecureFileValidator::validate_zip_file(&archive_path))
        })
        .await?;
        if let ValidationResult::Invalid(reason) = validation {
            return Err(ImportFailure::new(ImportErrorKind::Validation, reason));
        }

        let dir = self.temp.create_secure_temp_dir("import")?;
        *extract_dir = Some(dir.clone());

        let archive_path = staged.to_path_buf();
        let password_owned = password.map(str::to_string);
        let deadline = Instant::now() + EXTRACT_TIMEOUT;
        let extracted = tokio::task::spawn_blocking(move || {
            extract_archive(&archive_path, &dir, password_owned.as_deref(), deadline)
        })
        .await
        .map_err(|e| ImportFailure::new(ImportErrorKind::Io, format!("Extraction worker failed: {}", e)))??;

        let manifest_path = extracted.manifest.ok_or_else(|| {
            ImportFailure::new(ImportErrorKind::MissingManifest, "Archive contains no notes.json")
        })?;

        if let ValidationResult::Invalid(reason) =
            SecureFileValidator::validate_file_size(&manifest_path, MAX_MANIFEST_SIZE)
        {
            return Err(ImportFailure::new(ImportErrorKind::Validation, reason));
        }

        let manifest_text = tokio::fs::read_to_string(&manifest_path).await.map_err(|e| {
            ImportFailure::new(ImportErrorKind::InvalidManifest, format!("Unreadable notes.json: {}", e))
        })?;
        let manifest: Vec<ExportNote> = serde_json::from_str(&manifest_text).map_err(|e| {
            ImportFailure::new(ImportErrorKind::InvalidManifest, format!("Malformed notes.json: {}", e))
        })?;

        if manifest.len() > MAX_IMPORT_NOTES {
            return Err(ImportFailure::new(
                ImportErrorKind::Validation,
                format!("Too many notes: {} (max {})", manifest.len(), MAX_IMPORT_NOTES),
            ));
        }

        let mut warnings = Vec::new();
        let referenced = referenced_media_keys(&manifest);
        let (mapping, copied) = self
            .copy_media(&extracted.media, &referenced, &mut warnings)
            .await;

        let new_notes = build_new_notes(&manifest, &mapping, &mut warnings);
        let count = new_notes.len();

        if let Err(e) = self.repo.import_notes(new_notes, replace_existing).await {
            for path in &copied {
                if let Err(cleanup) = self.media.delete(path).await {
                    tracing::warn!("Failed to remove imported media {:?}: {}", path, cleanup);
                }
            }
            return Err(e.into());
        }

        if replace_existing {
            match self.repo.referenced_media_paths().await {
                Ok(referenced) => {
                    if let Err(e) = self.media.remove_unreferenced(&referenced).await {
                        tracing::warn!("Orphaned media cleanup failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Orphaned media cleanup skipped: {}", e),
            }
        }

        Ok((count, warnings))
    }

    /// Copy referenced media into the store, returning the path mapping and
    /// the stored files
    async fn copy_media(
        &self,
        extracted: &[(String, PathBuf)],
        referenced: &HashSet<String>,
        warnings: &mut Vec<String>,
    ) -> (HashMap<String, String>, Vec<PathBuf>) {
        let mut mapping = HashMap::new();
        let mut copied = Vec::new();

        for (key, path) in extracted {
            if !referenced.contains(key) {
                tracing::debug!("Skipping {}: no note refers to it", key);
                continue;
            }

            if MediaStore::kind_for(key).is_none() {
                warnings.push(format!("Skipped {}: unsupported media type", key));
                continue;
            }

            if let ValidationResult::Invalid(_) =
                SecureFileValidator::validate_file_size(path, DEFAULT_MAX_FILE_SIZE)
            {
                warnings.push(format!("Skipped {}: file too large", key));
                continue;
            }

            match self.media.import_file(path).await {
                Ok(stored) => {
                    tracing::debug!("Imported media {} -> {:?}", key, stored);
                    mapping.insert(key.clone(), stored.to_string_lossy().into_owned());
                    copied.push(stored);
                }
                Err(e) => warnings.push(format!("Skipped {}: {}", key, e)),
            }
        }

        (mapping, copied)
    }

    /// Wipe a staged file or directory. The overwrite passes run on the
    /// blocking pool.
    async fn discard(&self, path: &Path, is_dir: bool) {
        let temp = self.temp.clone();
        let target = path.to_path_buf();

        let wiped = tokio::task::spawn_blocking(move || {
            if is_dir {
                temp.secure_delete_dir(&target)
            } else {
                temp.secure_delete(&target)
            }
        })
        .await;

        match wiped {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Temporary data at {:?} was not fully wiped", path),
            Err(e) => tracing::warn!("Wipe of {:?} did not finish: {}", path, e),
        }
    }
}

fn build_new_notes(
    manifest: &[ExportNote],
    mapping: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> Vec<NewNote> {
    let now = Utc::now();

    manifest
        .iter()
        .map(|entry| {
            let created_at = entry
                .created_at
                .as_ref()
                .and_then(|t| t.to_datetime())
                .unwrap_or(now);
            let updated_at = entry
                .updated_at
                .as_ref()
                .and_then(|t| t.to_datetime())
                .unwrap_or(created_at);

            NewNote {
                title: import_title(entry),
                category: entry
                    .category
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CATEGORY_ID.to_string()),
                created_at,
                updated_at,
                version: entry.version.max(1),
                blocks: import_blocks(entry, mapping, warnings),
            }
        })
        .collect()
}

/// Run blocking archive work off the async runtime
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Generic(format!("Background task failed: {}", e)))?
}

/// Write `notes.json` first, then one `media/<name>` entry per planned file
fn write_archive(
    path: &Path,
    manifest_json: &[u8],
    media_entries: &[(String, String)],
    password: Option<&str>,
) -> Result<()> {
    let result = (|| -> Result<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);

        let plain = FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
        let options = match password {
            Some(password) => plain.with_aes_encryption(zip::AesMode::Aes256, password),
            None => plain,
        };

        zip.start_file(MANIFEST_ENTRY, options)?;
        zip.write_all(manifest_json)?;

        for (name, source) in media_entries {
            let data = std::fs::read(source)?;
            zip.start_file(format!("{}{}", MEDIA_ENTRY_PREFIX, name), options)?;
            zip.write_all(&data)?;
            tracing::debug!("Added media/{} ({} bytes)", name, data.len());
        }

        let mut file = zip.finish()?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

/// Extract `notes.json` and `media/*` into `dir`.
///
/// Every entry is capped at its declared size and the running total at
/// the uncompressed limit; `deadline` is checked per chunk.
fn extract_archive(
    archive_path: &Path,
    dir: &Path,
    password: Option<&str>,
    deadline: Instant,
) -> std::result::Result<Extracted, ImportFailure> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        ImportFailure::new(ImportErrorKind::Validation, format!("Not a valid ZIP archive: {}", e))
    })?;

    let mut extracted = Extracted::default();
    let mut total: u64 = 0;
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];

    for index in 0..archive.len() {
        let (name, is_dir) = {
            let raw = archive.by_index_raw(index).map_err(zip_failure)?;
            (raw.name().to_string(), raw.is_dir())
        };

        let is_manifest = name == MANIFEST_ENTRY;
        let is_media = !is_dir
            && name
                .strip_prefix(MEDIA_ENTRY_PREFIX)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));

        if !is_manifest && !is_media {
            tracing::debug!("Ignoring archive entry: {}", name);
            continue;
        }

        let target = SecureFileValidator::create_secure_extract_path(dir, &name)?;

        let mut entry = match password {
            Some(password) => archive.by_index_decrypt(index, password.as_bytes()),
            None => archive.by_index(index),
        }
        .map_err(zip_failure)?;

        let declared = entry.size();
        let encrypted = entry.encrypted();
        let mut output = File::create(&target)?;
        let mut written: u64 = 0;

        loop {
            if Instant::now() > deadline {
                return Err(ImportFailure::new(
                    ImportErrorKind::Validation,
                    "Archive extraction timed out",
                ));
            }

            let read = entry.read(&mut buffer).map_err(|e| {
                if encrypted {
                    ImportFailure::new(
                        ImportErrorKind::WrongPassword,
                        format!("Incorrect password or corrupted archive: {}", e),
                    )
                } else {
                    ImportFailure::new(
                        ImportErrorKind::Validation,
                        format!("Corrupted entry {}: {}", name, e),
                    )
                }
            })?;
            if read == 0 {
                break;
            }

            written += read as u64;
            total += read as u64;
            if written > declared || total > MAX_UNCOMPRESSED_SIZE {
                return Err(ImportFailure::new(
                    ImportErrorKind::Validation,
                    format!("Entry {} exceeds its declared size", name),
                ));
            }

            output.write_all(&buffer[..read])?;
        }

        output.sync_all()?;

        if is_manifest {
            extracted.manifest = Some(target);
        } else {
            extracted.media.push((name, target));
        }
    }

    Ok(extracted)
}

fn zip_failure(err: ZipError) -> ImportFailure {
    match err {
        ZipError::InvalidPassword => {
            ImportFailure::new(ImportErrorKind::WrongPassword, "Incorrect password")
        }
        ZipError::UnsupportedArchive(msg) if msg == ZipError::PASSWORD_REQUIRED => {
            ImportFailure::new(
                ImportErrorKind::WrongPassword,
                "Archive is password protected",
            )
        }
        other => ImportFailure::new(ImportErrorKind::Validation, format!("Unreadable archive: {}", other)),
    }
}
