//! Database models
//!
//! Rust structs representing stored entities. Notes carry one canonical
//! ordered block list; the flat legacy form lives in `legacy.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A note with its ordered content blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    /// Category id (no foreign key, by convention only)
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub blocks: Vec<ContentBlock>,
}

/// Media reference shared by image and audio blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Path of the file in app-private storage
    pub local_path: String,
    pub remote_url: Option<String>,
    pub alt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl MediaRef {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            local_path: path.into(),
            ..Default::default()
        }
    }
}

/// Type-specific payload of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockKind {
    Text { text: String },
    Image { media: MediaRef },
    Audio { media: MediaRef, duration_ms: i64 },
}

impl BlockKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Text { .. } => "text",
            BlockKind::Image { .. } => "image",
            BlockKind::Audio { .. } => "audio",
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            BlockKind::Text { .. } => None,
            BlockKind::Image { media } | BlockKind::Audio { media, .. } => Some(media),
        }
    }

    pub fn media_mut(&mut self) -> Option<&mut MediaRef> {
        match self {
            BlockKind::Text { .. } => None,
            BlockKind::Image { media } | BlockKind::Audio { media, .. } => Some(media),
        }
    }
}

/// A single ordered unit of note content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    /// Position within the note, unique per note
    pub order: i64,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl ContentBlock {
    pub fn new(order: i64, kind: BlockKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order,
            kind,
        }
    }

    pub fn text(order: i64, text: impl Into<String>) -> Self {
        Self::new(order, BlockKind::Text { text: text.into() })
    }

    pub fn image(order: i64, media: MediaRef) -> Self {
        Self::new(order, BlockKind::Image { media })
    }

    pub fn audio(order: i64, media: MediaRef, duration_ms: i64) -> Self {
        Self::new(order, BlockKind::Audio { media, duration_ms })
    }
}

/// Sort blocks by order, renumber when orders collide, and guarantee at
/// least one (possibly empty) text block.
pub fn normalize_blocks(mut blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    if blocks.is_empty() {
        return vec![ContentBlock::text(0, "")];
    }

    blocks.sort_by_key(|b| b.order);

    let has_duplicates = blocks.windows(2).any(|w| w[0].order == w[1].order);
    if has_duplicates {
        for (index, block) in blocks.iter_mut().enumerate() {
            block.order = index as i64;
        }
    }

    blocks
}

/// Media type of a legacy media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaKind {
    Image,
    Audio,
}

/// Legacy flat media reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub path: String,
    #[serde(default, rename = "duration")]
    pub duration_ms: Option<i64>,
}

/// Note category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Create note request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    pub category: Option<String>,
    pub blocks: Vec<ContentBlock>,
}

/// A note prepared for insertion with explicit timestamps (used by import)
#[derive(Debug, Clone)]
pub struct NewNote {
    pub title: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    pub blocks: Vec<ContentBlock>,
}

/// Row of the `notes` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct NoteRow {
    pub id: String,
    pub title: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl NoteRow {
    pub fn into_note(self, blocks: Vec<ContentBlock>) -> Note {
        Note {
            id: self.id,
            title: self.title,
            category: self.category,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
            blocks,
        }
    }
}

/// Row of the `note_blocks` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct BlockRow {
    pub id: String,
    pub note_id: String,
    pub kind: String,
    pub position: i64,
    pub text: Option<String>,
    pub local_path: Option<String>,
    pub remote_url: Option<String>,
    pub alt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl BlockRow {
    pub fn into_block(self) -> ContentBlock {
        let media = || MediaRef {
            local_path: self.local_path.clone().unwrap_or_default(),
            remote_url: self.remote_url.clone(),
            alt: self.alt.clone(),
            width: self.width,
            height: self.height,
        };

        let kind = match self.kind.as_str() {
            "image" => BlockKind::Image { media: media() },
            "audio" => BlockKind::Audio {
                media: media(),
                duration_ms: self.duration_ms.unwrap_or(0),
            },
            _ => BlockKind::Text {
                text: self.text.clone().unwrap_or_default(),
            },
        };

        ContentBlock {
            id: self.id,
            order: self.position,
            kind,
        }
    }
}
