//! Media file storage
//!
//! Images and audio recordings live as plain files in two app-private
//! folders. Every stored file gets a fresh unique name that keeps the
//! original extension, e.g. `images/3f2a...c1.png`.

use crate::config::{AUDIO_EXTENSIONS, IMAGE_EXTENSIONS};
use crate::database::MediaKind;
use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// App-private media store
#[derive(Clone)]
pub struct MediaStore {
    images_dir: PathBuf,
    audio_dir: PathBuf,
}

impl MediaStore {
    pub fn new(images_dir: PathBuf, audio_dir: PathBuf) -> Self {
        Self {
            images_dir,
            audio_dir,
        }
    }

    /// Initialize the media store (create directories if needed)
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.images_dir).await?;
        fs::create_dir_all(&self.audio_dir).await?;
        tracing::info!(
            "Media store initialized at: {:?}, {:?}",
            self.images_dir,
            self.audio_dir
        );
        Ok(())
    }

    /// Classify a file name by its extension
    pub fn kind_for(name: &str) -> Option<MediaKind> {
        let ext = extension_of(name)?;
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }

    /// Folder holding media of the given kind
    pub fn dir_for(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Image => &self.images_dir,
            MediaKind::Audio => &self.audio_dir,
        }
    }

    /// Copy an external file into the store under a fresh name
    pub async fn import_file(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Generic(format!("Invalid media file name: {:?}", source)))?;

        let kind = Self::kind_for(name)
            .ok_or_else(|| AppError::Generic(format!("Unsupported media type: {}", name)))?;

        let data = fs::read(source).await?;
        self.write(kind, extension_of(name).as_deref().unwrap_or_default(), &data)
            .await
    }

    /// Write bytes as a new media file, returns its path
    pub async fn write(&self, kind: MediaKind, extension: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self.dir_for(kind);
        fs::create_dir_all(dir).await?;

        let file_name = if extension.is_empty() {
            Uuid::new_v4().simple().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4().simple(), extension)
        };
        let path = dir.join(file_name);

        // Write to temp file first (atomic write)
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Wrote media: {:?} ({} bytes)", path, data.len());

        Ok(path)
    }

    /// Whether a path points inside one of the media folders
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.images_dir) || path.starts_with(&self.audio_dir)
    }

    /// Delete a media file. Paths outside the store are ignored.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        if !self.owns(path) {
            tracing::warn!("Refusing to delete media outside store: {:?}", path);
            return Ok(());
        }

        if !path.exists() {
            return Ok(()); // Already deleted
        }

        fs::remove_file(path).await?;

        tracing::debug!("Deleted media: {:?}", path);

        Ok(())
    }

    /// Delete stored files whose path is not in `referenced`, returns how many
    pub async fn remove_unreferenced(&self, referenced: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;

        for path in self.list_all().await? {
            if referenced.contains(path.to_string_lossy().as_ref()) {
                continue;
            }
            self.delete(&path).await?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!("Removed {} orphaned media files", removed);
        }
        Ok(removed)
    }

    /// List every stored media file
    pub async fn list_all(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for dir in [&self.images_dir, &self.audio_dir] {
            if !dir.exists() {
                continue;
            }

            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
