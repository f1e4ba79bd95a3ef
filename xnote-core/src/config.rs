//! Application configuration constants
//!
//! Central location for resource limits, validation boundaries and the
//! on-disk layout of application data.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ===== Archive Validation Limits =====

/// Maximum size of an incoming archive on disk (50 MiB)
pub const MAX_ZIP_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum sum of uncompressed entry sizes (100 MiB)
pub const MAX_UNCOMPRESSED_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum number of entries in an archive
pub const MAX_ENTRY_COUNT: usize = 1000;

/// Maximum uncompressed/compressed ratio for a single entry.
/// Anything above this is treated as a zip bomb.
pub const MAX_COMPRESSION_RATIO: f64 = 100.0;

/// Maximum length of an entry name
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Maximum number of path segments in an entry name
pub const MAX_PATH_DEPTH: usize = 10;

/// Entry extensions accepted inside an archive
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "json", "txt", "jpg", "jpeg", "png", "webp", "mp3", "wav", "m4a", "aac",
];

/// Characters never allowed in an entry name
pub const FORBIDDEN_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\0'];

/// Image extensions recognised when importing media
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Audio extensions recognised when importing media
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac"];

// ===== Export / Import Limits =====

/// Default per-file size limit for media copied into or out of an archive (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum size of the extracted `notes.json` (5 MiB)
pub const MAX_MANIFEST_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of notes accepted from one manifest
pub const MAX_IMPORT_NOTES: usize = 10_000;

/// Imported titles are truncated to this many characters
pub const MAX_TITLE_CHARS: usize = 200;

/// Imported text blocks are truncated to this many characters
pub const MAX_TEXT_BLOCK_CHARS: usize = 10_000;

/// Upper bound on the time spent decompressing an untrusted archive
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of the manifest entry inside an export archive
pub const MANIFEST_ENTRY: &str = "notes.json";

/// Folder holding media entries inside an export archive
pub const MEDIA_ENTRY_PREFIX: &str = "media/";

/// Date format used for manifest timestamps
pub const MANIFEST_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ===== Password Policy =====

/// Minimum length of an export password
pub const MIN_PASSWORD_LENGTH: usize = 8;

// ===== Secure Deletion =====

/// Number of random overwrite passes before a temp file is unlinked
pub const SECURE_DELETE_PASSES: usize = 3;

/// Buffer size used when overwriting file contents
pub const OVERWRITE_BUFFER_SIZE: usize = 8192;

// ===== Security Settings Limits =====

/// Default session timeout in minutes
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Minimum session timeout in minutes
pub const MIN_SESSION_TIMEOUT_MINUTES: i64 = 1;

/// Maximum session timeout in minutes (24 hours)
pub const MAX_SESSION_TIMEOUT_MINUTES: i64 = 1440;

/// Category assigned to notes created without one
pub const DEFAULT_CATEGORY_ID: &str = "daily";

/// Directory layout of application data
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub images_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub secure_config_path: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            images_dir: data_dir.join("images"),
            audio_dir: data_dir.join("audio"),
            exports_dir: data_dir.join("exports"),
            cache_dir: data_dir.join("cache"),
            db_path: data_dir.join("xnote.db"),
            secure_config_path: data_dir.join("secure_config.json"),
            data_dir,
        }
    }

    /// Create every directory of the layout
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.data_dir,
            &self.images_dir,
            &self.audio_dir,
            &self.exports_dir,
            &self.cache_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
