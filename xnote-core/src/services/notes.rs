//! Notes service
//!
//! High-level business logic for notes operations.
//! Handles note lifecycle, categories, rendering and the media files
//! attached to notes.

use crate::config::DEFAULT_CATEGORY_ID;
use crate::database::{
    basename, format_duration, BlockKind, Category, ContentBlock, CreateNoteRequest, MediaKind,
    MediaRef, Note, Repository,
};
use crate::error::{AppError, Result};
use crate::storage::MediaStore;
use std::path::Path;

const TITLE_PREVIEW_CHARS: usize = 30;
const UNTITLED: &str = "Untitled";

/// Service for managing notes
#[derive(Clone)]
pub struct NotesService {
    repo: Repository,
    media: MediaStore,
}

impl NotesService {
    pub fn new(repo: Repository, media: MediaStore) -> Self {
        Self { repo, media }
    }

    /// Create a new note. A blank title is derived from the content.
    pub async fn create_note(
        &self,
        title: String,
        category: Option<String>,
        blocks: Vec<ContentBlock>,
    ) -> Result<Note> {
        let title = if title.trim().is_empty() {
            derive_title(&blocks)
        } else {
            title
        };
        tracing::info!("Creating new note: {}", title);

        let req = CreateNoteRequest {
            title,
            category,
            blocks,
        };

        let note = self.repo.create_note(req).await?;

        tracing::info!("Note created successfully: {}", note.id);

        Ok(note)
    }

    /// Get a note by ID
    pub async fn get_note(&self, id: &str) -> Result<Note> {
        self.repo.get_note(id).await
    }

    /// List all notes, most recently updated first
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        self.repo.list_notes().await
    }

    pub async fn list_notes_by_category(&self, category: &str) -> Result<Vec<Note>> {
        self.repo.list_notes_by_category(category).await
    }

    pub async fn count_notes(&self) -> Result<i64> {
        self.repo.count_notes().await
    }

    /// Save a note
    pub async fn update_note(&self, note: &Note) -> Result<Note> {
        tracing::debug!("Updating note: {}", note.id);

        let note = self.repo.update_note(note).await?;

        tracing::debug!("Note updated successfully: {} (v{})", note.id, note.version);

        Ok(note)
    }

    /// Delete a note
    pub async fn delete_note(&self, id: &str) -> Result<()> {
        tracing::info!("Deleting note: {}", id);

        self.repo.delete_note(id).await?;

        tracing::info!("Note deleted successfully: {}", id);

        Ok(())
    }

    /// Delete several notes, returns how many existed
    pub async fn delete_notes(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        tracing::info!("Deleting {} notes", ids.len());
        self.repo.delete_notes(ids).await
    }

    /// Search notes by title or content. A blank query returns every note.
    pub async fn search_notes(&self, query: &str) -> Result<Vec<Note>> {
        let query = query.trim();
        if query.is_empty() {
            return self.list_notes().await;
        }
        self.repo.search_notes(query).await
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        self.repo.list_categories().await
    }

    pub async fn create_category(&self, name: &str) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Generic(
                "Category name cannot be empty".to_string(),
            ));
        }
        tracing::info!("Creating category: {}", name);
        self.repo.create_category(name).await
    }

    /// Delete a user category. Default categories cannot be deleted.
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        let category = self.repo.get_category(id).await?;
        if category.is_default || category.id == DEFAULT_CATEGORY_ID {
            return Err(AppError::Generic(format!(
                "Cannot delete default category: {}",
                category.name
            )));
        }
        tracing::info!("Deleting category: {}", id);
        self.repo.delete_category(id).await
    }

    /// Copy a media file into app storage and append it to a note
    pub async fn attach_media(
        &self,
        note_id: &str,
        source: &Path,
        duration_ms: Option<i64>,
    ) -> Result<Note> {
        let name = source.to_string_lossy();
        let kind = MediaStore::kind_for(&name)
            .ok_or_else(|| AppError::Generic(format!("Unsupported media type: {}", name)))?;

        let mut note = self.repo.get_note(note_id).await?;
        let stored = self.media.import_file(source).await?;
        let media = MediaRef::local(stored.to_string_lossy());

        let order = note.blocks.iter().map(|b| b.order).max().unwrap_or(-1) + 1;
        note.blocks.push(match kind {
            MediaKind::Image => ContentBlock::image(order, media),
            MediaKind::Audio => ContentBlock::audio(order, media, duration_ms.unwrap_or(0)),
        });

        match self.repo.update_note(&note).await {
            Ok(updated) => {
                tracing::info!("Attached media to note {}: {:?}", note_id, stored);
                Ok(updated)
            }
            Err(e) => {
                // Don't leave an unreferenced copy behind
                if let Err(cleanup) = self.media.delete(&stored).await {
                    tracing::warn!("Failed to remove media {:?}: {}", stored, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Delete stored media files no note refers to
    pub async fn cleanup_orphaned_media(&self) -> Result<usize> {
        let referenced = self.repo.referenced_media_paths().await?;
        self.media.remove_unreferenced(&referenced).await
    }

    /// Delete every note and every stored media file
    pub async fn clear_all_data(&self) -> Result<u64> {
        tracing::warn!("Clearing all note data");

        let deleted = self.repo.delete_all_notes().await?;
        let removed = self.cleanup_orphaned_media().await?;

        tracing::info!("Cleared {} notes and {} media files", deleted, removed);
        Ok(deleted)
    }
}

/// Title from the first sentence of the first non-blank text block
pub fn derive_title(blocks: &[ContentBlock]) -> String {
    let mut sorted: Vec<&ContentBlock> = blocks.iter().collect();
    sorted.sort_by_key(|b| b.order);

    let first_text = sorted.into_iter().find_map(|b| match &b.kind {
        BlockKind::Text { text } if !text.trim().is_empty() => Some(text.trim()),
        _ => None,
    });

    let Some(text) = first_text else {
        return UNTITLED.to_string();
    };

    let sentence = text
        .split(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .next()
        .unwrap_or(text)
        .trim();
    if sentence.is_empty() {
        return UNTITLED.to_string();
    }

    if sentence.chars().count() > TITLE_PREVIEW_CHARS {
        let preview: String = sentence.chars().take(TITLE_PREVIEW_CHARS).collect();
        format!("{}...", preview.trim_end())
    } else {
        sentence.to_string()
    }
}

/// Render a note as plain text, media shown as bracketed labels
pub fn render_plain_text(note: &Note) -> String {
    let mut parts = vec![note.title.clone()];

    for block in sorted_blocks(note) {
        match &block.kind {
            BlockKind::Text { text } => parts.push(text.clone()),
            BlockKind::Image { media } => {
                let label = media.alt.as_deref().unwrap_or_else(|| basename(&media.local_path));
                parts.push(format!("[Image: {}]", label));
            }
            BlockKind::Audio { duration_ms, .. } => {
                parts.push(format!("[Audio {}]", format_duration(*duration_ms)));
            }
        }
    }

    parts.join("\n\n")
}

/// Render a note as Markdown
pub fn render_markdown(note: &Note) -> String {
    let mut parts = vec![format!("# {}", note.title)];

    for block in sorted_blocks(note) {
        match &block.kind {
            BlockKind::Text { text } => parts.push(text.clone()),
            BlockKind::Image { media } => {
                let target = media
                    .remote_url
                    .as_deref()
                    .unwrap_or_else(|| basename(&media.local_path));
                parts.push(format!(
                    "![{}]({})",
                    media.alt.as_deref().unwrap_or_default(),
                    target
                ));
            }
            BlockKind::Audio { media, duration_ms } => {
                parts.push(format!(
                    "[Audio ({})]({})",
                    format_duration(*duration_ms),
                    basename(&media.local_path)
                ));
            }
        }
    }

    parts.join("\n\n")
}

fn sorted_blocks(note: &Note) -> Vec<&ContentBlock> {
    let mut blocks: Vec<&ContentBlock> = note.blocks.iter().collect();
    blocks.sort_by_key(|b| b.order);
    blocks
}
