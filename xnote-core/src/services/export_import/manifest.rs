//! Export manifest (`notes.json`)
//!
//! Serialization-only projection of notes. Media payloads are referred to
//! by a file name inside the archive's `media/` folder. Older archives
//! carried a flat `content` string plus `mediaItems`; those are still
//! accepted on read.

use crate::config::{MANIFEST_DATE_FORMAT, MAX_TEXT_BLOCK_CHARS, MAX_TITLE_CHARS, MEDIA_ENTRY_PREFIX};
use crate::database::legacy::{basename, decode_legacy};
use crate::database::{BlockKind, ContentBlock, MediaItem, MediaRef, Note};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const UNKNOWN_BLOCK_PLACEHOLDER: &str = "[Unsupported content]";

/// Timestamp as written by any known exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestTime {
    Text(String),
    Millis(i64),
}

impl ManifestTime {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        ManifestTime::Text(dt.format(MANIFEST_DATE_FORMAT).to_string())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ManifestTime::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            ManifestTime::Text(text) => NaiveDateTime::parse_from_str(text, MANIFEST_DATE_FORMAT)
                .map(|naive| naive.and_utc())
                .ok()
                .or_else(|| {
                    DateTime::parse_from_rfc3339(text)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                }),
        }
    }
}

/// Note id as written by any known exporter. Only informational, imports
/// always assign fresh ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestId {
    Text(String),
    Number(i64),
}

impl Default for ManifestId {
    fn default() -> Self {
        ManifestId::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportNote {
    #[serde(default)]
    pub id: ManifestId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<ManifestTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<ManifestTime>,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub blocks: Vec<ExportBlock>,
    /// Legacy flat body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Legacy media array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_items: Option<Vec<MediaItem>>,
}

fn default_version() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Device path written by older block exporters in place of `mediaFileName`
    #[serde(default, skip_serializing)]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing)]
    pub url: Option<String>,
}

impl ExportBlock {
    /// Archive file name of the block's media, falling back to older fields
    fn media_reference(&self) -> Option<&str> {
        self.media_file_name
            .as_deref()
            .or(self.local_path.as_deref())
            .or(self.url.as_deref())
            .filter(|name| !basename(name).is_empty())
    }

    fn text(order: i64, text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            order,
            text: Some(text.into()),
            media_file_name: None,
            alt: None,
            width: None,
            height: None,
            duration: None,
            remote_url: None,
            local_path: None,
            url: None,
        }
    }

    fn media(order: i64, block_type: &str, file_name: String, media: &MediaRef) -> Self {
        Self {
            block_type: block_type.to_string(),
            order,
            text: None,
            media_file_name: Some(file_name),
            alt: media.alt.clone(),
            width: media.width,
            height: media.height,
            duration: None,
            remote_url: media.remote_url.clone(),
            local_path: None,
            url: None,
        }
    }
}

/// Archive names chosen for the media files of an export.
///
/// One source file maps to one archive name, however many blocks use it.
/// Names are unique case-insensitively.
#[derive(Debug, Default)]
pub struct MediaPlan {
    by_source: HashMap<String, String>,
    used: HashSet<String>,
    entries: Vec<(String, String)>,
}

impl MediaPlan {
    /// Archive file name (without the `media/` prefix) for a local path
    pub fn assign(&mut self, local_path: &str) -> String {
        if let Some(name) = self.by_source.get(local_path) {
            return name.clone();
        }

        let base = safe_file_name(basename(local_path));
        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (base.clone(), String::new()),
        };

        let mut candidate = base.clone();
        let mut counter = 1;
        while self.used.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}{}", stem, counter, ext);
            counter += 1;
        }

        self.used.insert(candidate.to_lowercase());
        self.by_source
            .insert(local_path.to_string(), candidate.clone());
        self.entries
            .push((candidate.clone(), local_path.to_string()));
        candidate
    }

    /// `(archive file name, local path)` pairs in assignment order
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` and collapse `..`
fn safe_file_name(name: &str) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    while safe.contains("..") {
        safe = safe.replace("..", ".");
    }

    if safe.is_empty() {
        safe.push_str("media");
    }
    safe
}

/// Decides per media block whether its file can be exported
pub trait MediaCheck {
    /// `Err(reason)` when the file must be left out
    fn check(&self, local_path: &str) -> std::result::Result<(), String>;
}

/// Project a note into its manifest form.
///
/// Media blocks whose file fails `media_check` become a placeholder text
/// block and add a warning.
pub fn export_note(
    note: &Note,
    plan: &mut MediaPlan,
    media_check: &dyn MediaCheck,
    warnings: &mut Vec<String>,
) -> ExportNote {
    let mut blocks = Vec::with_capacity(note.blocks.len());

    for block in &note.blocks {
        let exported = match &block.kind {
            BlockKind::Text { text } => ExportBlock::text(block.order, text.clone()),
            BlockKind::Image { media } | BlockKind::Audio { media, .. } => {
                let label = block.kind.type_name();
                match media_check.check(&media.local_path) {
                    Ok(()) => {
                        let name = plan.assign(&media.local_path);
                        let mut exported = ExportBlock::media(block.order, label, name, media);
                        if let BlockKind::Audio { duration_ms, .. } = &block.kind {
                            exported.duration = Some(*duration_ms);
                        }
                        exported
                    }
                    Err(reason) => {
                        warnings.push(format!(
                            "Note \"{}\": {} {} skipped ({})",
                            note.title, label, media.local_path, reason
                        ));
                        ExportBlock::text(block.order, format!("[{} unavailable]", label))
                    }
                }
            }
        };
        blocks.push(exported);
    }

    ExportNote {
        id: ManifestId::Text(note.id.clone()),
        title: note.title.clone(),
        category: Some(note.category.clone()),
        created_at: Some(ManifestTime::from_datetime(note.created_at)),
        updated_at: Some(ManifestTime::from_datetime(note.updated_at)),
        version: note.version,
        blocks,
        content: None,
        media_items: None,
    }
}

/// Archive-relative key of a media file, e.g. `media/a.png`
pub fn media_key(file_name: &str) -> String {
    format!("{}{}", MEDIA_ENTRY_PREFIX, basename(file_name))
}

/// Archive keys (`media/<name>`) that some note in the manifest points at.
/// Media entries outside this set are never copied into the store.
pub fn referenced_media_keys(manifest: &[ExportNote]) -> HashSet<String> {
    let mut keys = HashSet::new();

    for note in manifest {
        if note.blocks.is_empty() && note.content.is_some() {
            // Every legacy item ends up as a block, matched or appended
            for item in note.media_items.iter().flatten() {
                keys.insert(media_key(&item.path));
            }
            continue;
        }

        for block in &note.blocks {
            if !matches!(block.block_type.to_lowercase().as_str(), "image" | "audio") {
                continue;
            }
            if let Some(name) = block.media_reference() {
                keys.insert(media_key(name));
            }
        }
    }

    keys
}

/// Rebuild blocks for an imported note.
///
/// `mapping` goes from `media/<name>` to the stored copy. References with
/// no stored copy keep their archive-relative path and add a warning.
pub fn import_blocks(
    note: &ExportNote,
    mapping: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> Vec<ContentBlock> {
    if note.blocks.is_empty() {
        if let Some(content) = &note.content {
            let items = note.media_items.as_deref().unwrap_or_default();
            let mut decoded = decode_legacy(&truncate_chars(content, MAX_TEXT_BLOCK_CHARS), items);

            for name in &decoded.unmatched_markers {
                warnings.push(format!(
                    "Note \"{}\": no media item for marker {}",
                    note.title, name
                ));
            }
            for path in &decoded.appended_items {
                warnings.push(format!(
                    "Note \"{}\": media {} had no marker, added at the end",
                    note.title,
                    basename(path)
                ));
            }

            for block in &mut decoded.blocks {
                if let Some(media) = block.kind.media_mut() {
                    media.local_path = resolve_media(note, &media.local_path, mapping, warnings);
                }
            }
            return decoded.blocks;
        }
    }

    let mut blocks = Vec::with_capacity(note.blocks.len());
    for block in &note.blocks {
        let kind = match block.block_type.to_lowercase().as_str() {
            "text" => BlockKind::Text {
                text: truncate_chars(block.text.as_deref().unwrap_or_default(), MAX_TEXT_BLOCK_CHARS),
            },
            kind @ ("image" | "audio") => {
                let Some(file_name) = block.media_reference() else {
                    warnings.push(format!(
                        "Note \"{}\": {} block without media file",
                        note.title, kind
                    ));
                    blocks.push(ContentBlock::text(block.order, format!("[{} unavailable]", kind)));
                    continue;
                };

                let media = MediaRef {
                    local_path: resolve_media(note, file_name, mapping, warnings),
                    remote_url: block.remote_url.clone(),
                    alt: block.alt.clone(),
                    width: block.width,
                    height: block.height,
                };

                if kind == "image" {
                    BlockKind::Image { media }
                } else {
                    BlockKind::Audio {
                        media,
                        duration_ms: block.duration.unwrap_or(0),
                    }
                }
            }
            other => {
                tracing::warn!("Unknown block type in manifest: {}", other);
                BlockKind::Text {
                    text: UNKNOWN_BLOCK_PLACEHOLDER.to_string(),
                }
            }
        };
        blocks.push(ContentBlock::new(block.order, kind));
    }

    blocks
}

fn resolve_media(
    note: &ExportNote,
    reference: &str,
    mapping: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> String {
    let key = media_key(reference);
    match mapping.get(&key) {
        Some(path) => path.clone(),
        None => {
            warnings.push(format!(
                "Note \"{}\": media {} not found in archive",
                note.title, key
            ));
            key
        }
    }
}

/// Title clipped to the import limit
pub fn import_title(note: &ExportNote) -> String {
    truncate_chars(&note.title, MAX_TITLE_CHARS)
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MediaKind;

    struct AllowAll;

    impl MediaCheck for AllowAll {
        fn check(&self, _local_path: &str) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct DenyAll;

    impl MediaCheck for DenyAll {
        fn check(&self, _local_path: &str) -> std::result::Result<(), String> {
            Err("file missing".to_string())
        }
    }

    fn sample_note() -> Note {
        let now = Utc::now();
        Note {
            id: "n1".to_string(),
            title: "Trip".to_string(),
            category: "other".to_string(),
            created_at: now,
            updated_at: now,
            version: 2,
            blocks: vec![
                ContentBlock::text(0, "Beach"),
                ContentBlock::image(1, MediaRef::local("/data/images/sea.png")),
                ContentBlock::audio(2, MediaRef::local("/data/audio/waves.m4a"), 5000),
            ],
        }
    }

    #[test]
    fn test_manifest_time_formats() {
        let parsed = ManifestTime::Text("2024-03-05 14:30:00".to_string())
            .to_datetime()
            .unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2024-03-05 14:30");

        let millis = ManifestTime::Millis(1_700_000_000_000).to_datetime().unwrap();
        assert_eq!(millis.timestamp(), 1_700_000_000);

        assert!(ManifestTime::Text("yesterday".to_string()).to_datetime().is_none());
    }

    #[test]
    fn test_export_note_json_shape() {
        let mut plan = MediaPlan::default();
        let mut warnings = Vec::new();

        let exported = export_note(&sample_note(), &mut plan, &AllowAll, &mut warnings);
        let json = serde_json::to_value(&exported).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(json["id"], "n1");
        assert_eq!(json["version"], 2);
        assert_eq!(json["blocks"][1]["type"], "image");
        assert_eq!(json["blocks"][1]["mediaFileName"], "sea.png");
        assert_eq!(json["blocks"][2]["duration"], 5000);
        assert!(json.get("content").is_none());
        assert_eq!(plan.entries().len(), 2);
    }

    #[test]
    fn test_missing_media_becomes_placeholder() {
        let mut plan = MediaPlan::default();
        let mut warnings = Vec::new();

        let exported = export_note(&sample_note(), &mut plan, &DenyAll, &mut warnings);

        assert_eq!(warnings.len(), 2);
        assert!(plan.entries().is_empty());
        assert_eq!(exported.blocks[1].block_type, "text");
    }

    #[test]
    fn test_media_plan_dedupes_names() {
        let mut plan = MediaPlan::default();

        let a = plan.assign("/x/photo.png");
        let b = plan.assign("/y/PHOTO.png");
        let again = plan.assign("/x/photo.png");
        let odd = plan.assign("/z/my pic..png");

        assert_eq!(a, "photo.png");
        assert_eq!(b, "PHOTO_1.png");
        assert_eq!(again, "photo.png");
        assert!(!odd.contains(".."));
        assert!(!odd.contains(' '));
        assert_eq!(plan.entries().len(), 3);
    }

    #[test]
    fn test_import_blocks_maps_media() {
        let mut plan = MediaPlan::default();
        let mut warnings = Vec::new();
        let exported = export_note(&sample_note(), &mut plan, &AllowAll, &mut warnings);

        let mapping = HashMap::from([(
            "media/sea.png".to_string(),
            "/store/images/new.png".to_string(),
        )]);

        let blocks = import_blocks(&exported, &mapping, &mut warnings);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].kind.media().unwrap().local_path, "/store/images/new.png");
        // Audio was not mapped: keeps archive-relative path and warns
        assert_eq!(blocks[2].kind.media().unwrap().local_path, "media/waves.m4a");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unknown_block_type_degrades() {
        let note: ExportNote = serde_json::from_str(
            r#"{"title":"t","blocks":[{"type":"video","order":0},{"type":"TEXT","order":1,"text":"hi"}]}"#,
        )
        .unwrap();

        let blocks = import_blocks(&note, &HashMap::new(), &mut Vec::new());

        assert_eq!(
            blocks[0].kind,
            BlockKind::Text {
                text: UNKNOWN_BLOCK_PLACEHOLDER.to_string()
            }
        );
        assert_eq!(blocks[1].kind, BlockKind::Text { text: "hi".into() });
    }

    #[test]
    fn test_legacy_note_is_converted() {
        let note: ExportNote = serde_json::from_str(
            r#"{
                "id": 7,
                "title": "Old",
                "content": "hello\n[图片:cat.jpg]\n[音频:rec.m4a 0:05]",
                "blocks": [],
                "category": "其他",
                "mediaItems": [
                    {"type": "IMAGE", "path": "/sdcard/x/cat.jpg", "duration": 0},
                    {"type": "AUDIO", "path": "/sdcard/x/rec.m4a", "duration": 5000},
                    {"type": "IMAGE", "path": "/sdcard/x/extra.png", "duration": 0}
                ],
                "createdAt": "2023-01-02 03:04:05",
                "updatedAt": "2023-01-02 03:04:05"
            }"#,
        )
        .unwrap();

        let mapping = HashMap::from([
            ("media/cat.jpg".to_string(), "/store/images/c.jpg".to_string()),
            ("media/rec.m4a".to_string(), "/store/audio/r.m4a".to_string()),
            ("media/extra.png".to_string(), "/store/images/e.png".to_string()),
        ]);

        let mut warnings = Vec::new();
        let blocks = import_blocks(&note, &mapping, &mut warnings);

        assert_eq!(note.id, ManifestId::Number(7));
        assert_eq!(note.media_items.as_ref().unwrap()[0].kind, MediaKind::Image);

        let types: Vec<&str> = blocks.iter().map(|b| b.kind.type_name()).collect();
        assert_eq!(types, ["text", "image", "audio", "image"]);
        assert_eq!(blocks[1].kind.media().unwrap().local_path, "/store/images/c.jpg");
        assert_eq!(
            blocks[2].kind,
            BlockKind::Audio {
                media: MediaRef::local("/store/audio/r.m4a"),
                duration_ms: 5000
            }
        );
        assert_eq!(blocks[3].kind.media().unwrap().local_path, "/store/images/e.png");

        // The unreferenced item is kept but reported
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("extra.png"));
    }

    #[test]
    fn test_older_block_fields_locate_media() {
        let note: ExportNote = serde_json::from_str(
            r#"{
                "id": 3,
                "title": "Blocks",
                "blocks": [
                    {"id": "block_1", "type": "TEXT", "order": 0, "text": "hi"},
                    {"id": "block_2", "type": "IMAGE", "order": 1, "url": "/sdcard/x/dog.jpg",
                     "alt": "", "width": 0, "height": 0, "localPath": "/sdcard/x/dog.jpg"}
                ]
            }"#,
        )
        .unwrap();

        let mapping = HashMap::from([(
            "media/dog.jpg".to_string(),
            "/store/images/d.jpg".to_string(),
        )]);

        let mut warnings = Vec::new();
        let blocks = import_blocks(&note, &mapping, &mut warnings);

        assert!(warnings.is_empty());
        assert_eq!(blocks[0].kind, BlockKind::Text { text: "hi".into() });
        assert_eq!(blocks[1].kind.media().unwrap().local_path, "/store/images/d.jpg");
    }

    #[test]
    fn test_referenced_media_keys() {
        let manifest: Vec<ExportNote> = serde_json::from_value(serde_json::json!([
            {
                "title": "blocks",
                "blocks": [
                    {"type": "text", "order": 0, "text": "media/not-this.png"},
                    {"type": "image", "order": 1, "mediaFileName": "a.png"},
                    {"type": "AUDIO", "order": 2, "localPath": "/sdcard/rec/b.m4a"}
                ]
            },
            {
                "title": "legacy",
                "content": "[图片:c.jpg]",
                "blocks": [],
                "mediaItems": [
                    {"type": "IMAGE", "path": "/old/c.jpg"},
                    {"type": "IMAGE", "path": "/old/d.jpg"}
                ]
            }
        ]))
        .unwrap();

        let mut keys: Vec<String> = referenced_media_keys(&manifest).into_iter().collect();
        keys.sort();

        assert_eq!(
            keys,
            ["media/a.png", "media/b.m4a", "media/c.jpg", "media/d.jpg"]
        );
    }

    #[test]
    fn test_truncation_limits() {
        let long_title = "t".repeat(MAX_TITLE_CHARS + 50);
        let note: ExportNote = serde_json::from_value(serde_json::json!({
            "title": long_title,
            "blocks": [{"type": "text", "order": 0, "text": "é".repeat(MAX_TEXT_BLOCK_CHARS + 1)}]
        }))
        .unwrap();

        assert_eq!(import_title(&note).chars().count(), MAX_TITLE_CHARS);

        let blocks = import_blocks(&note, &HashMap::new(), &mut Vec::new());
        match &blocks[0].kind {
            BlockKind::Text { text } => assert_eq!(text.chars().count(), MAX_TEXT_BLOCK_CHARS),
            other => panic!("unexpected block {:?}", other),
        }
    }
}
