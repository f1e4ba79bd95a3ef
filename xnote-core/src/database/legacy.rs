//! Legacy flat content codec
//!
//! Older notes stored a single text body plus a media array, with one
//! marker line per media item: `[图片:<file>]` for images and
//! `[音频:<file>]` or `[音频:<file> <m:ss>]` for recordings.
//! These functions convert between that form and ordered blocks.
//!
//! Text lines between two markers form one text block. A text line that
//! would read as a marker is written with a leading `\`.

use super::models::{BlockKind, ContentBlock, MediaItem, MediaKind, MediaRef};

const IMAGE_MARKER: &str = "[图片:";
const AUDIO_MARKER: &str = "[音频:";
const MARKER_END: char = ']';
const ESCAPE: char = '\\';

/// Flattened note body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyContent {
    pub content: String,
    pub media_items: Vec<MediaItem>,
}

/// Blocks rebuilt from a legacy body, plus what could not be placed
#[derive(Debug, Clone, Default)]
pub struct DecodedLegacy {
    pub blocks: Vec<ContentBlock>,
    /// File names of markers with no matching media item
    pub unmatched_markers: Vec<String>,
    /// Paths of media items no marker referred to, appended at the end
    pub appended_items: Vec<String>,
}

/// Flatten ordered blocks into a text body and a media array.
///
/// Adjacent text blocks have no boundary in the flat form and come back
/// as one block joined by `\n`.
pub fn blocks_to_legacy(blocks: &[ContentBlock]) -> LegacyContent {
    let mut sorted: Vec<&ContentBlock> = blocks.iter().collect();
    sorted.sort_by_key(|b| b.order);

    let mut lines: Vec<String> = Vec::with_capacity(sorted.len());
    let mut media_items = Vec::new();

    for block in sorted {
        match &block.kind {
            BlockKind::Text { text } => {
                lines.extend(text.split('\n').map(escape_line));
            }
            BlockKind::Image { media } => {
                lines.push(format!("{}{}{}", IMAGE_MARKER, basename(&media.local_path), MARKER_END));
                media_items.push(MediaItem {
                    kind: MediaKind::Image,
                    path: media.local_path.clone(),
                    duration_ms: None,
                });
            }
            BlockKind::Audio { media, duration_ms } => {
                let duration = if *duration_ms > 0 {
                    format!(" {}", format_duration(*duration_ms))
                } else {
                    String::new()
                };
                lines.push(format!(
                    "{}{}{}{}",
                    AUDIO_MARKER,
                    basename(&media.local_path),
                    duration,
                    MARKER_END
                ));
                media_items.push(MediaItem {
                    kind: MediaKind::Audio,
                    path: media.local_path.clone(),
                    duration_ms: Some(*duration_ms),
                });
            }
        }
    }

    LegacyContent {
        content: lines.join("\n"),
        media_items,
    }
}

/// Rebuild ordered blocks from a legacy body and media array
pub fn legacy_to_blocks(content: &str, media_items: &[MediaItem]) -> Vec<ContentBlock> {
    decode_legacy(content, media_items).blocks
}

/// Rebuild ordered blocks, reporting markers and media items that did not pair up.
///
/// A marker takes the first unused media item whose path ends with the
/// marker's file name. Unused media items are appended as blocks.
pub fn decode_legacy(content: &str, media_items: &[MediaItem]) -> DecodedLegacy {
    let mut decoded = DecodedLegacy::default();
    let mut used = vec![false; media_items.len()];
    let mut text_run: Option<Vec<&str>> = None;

    for line in content.split('\n') {
        let Some((kind, file_name)) = parse_marker(line) else {
            text_run.get_or_insert_with(Vec::new).push(unescape_line(line));
            continue;
        };

        if let Some(run) = text_run.take() {
            decoded.blocks.push(ContentBlock::text(0, run.join("\n")));
        }

        let found = media_items
            .iter()
            .enumerate()
            .position(|(i, item)| !used[i] && !file_name.is_empty() && item.path.ends_with(file_name));

        match found {
            Some(index) => {
                used[index] = true;
                decoded.blocks.push(media_block(kind, &media_items[index]));
            }
            None => decoded.unmatched_markers.push(file_name.to_string()),
        }
    }

    if let Some(run) = text_run.take() {
        decoded.blocks.push(ContentBlock::text(0, run.join("\n")));
    }

    for (item, _) in media_items.iter().zip(&used).filter(|(_, used)| !**used) {
        decoded.blocks.push(media_block(item.kind, item));
        decoded.appended_items.push(item.path.clone());
    }

    if decoded.blocks.is_empty() {
        decoded.blocks.push(ContentBlock::text(0, ""));
    }

    for (index, block) in decoded.blocks.iter_mut().enumerate() {
        block.order = index as i64;
    }

    decoded
}

fn media_block(kind: MediaKind, item: &MediaItem) -> ContentBlock {
    let media = MediaRef::local(item.path.clone());
    match kind {
        MediaKind::Image => ContentBlock::image(0, media),
        MediaKind::Audio => ContentBlock::audio(0, media, item.duration_ms.unwrap_or(0)),
    }
}

/// Marker kind and file name of a marker line
fn parse_marker(line: &str) -> Option<(MediaKind, &str)> {
    let inner = line.strip_suffix(MARKER_END)?;

    if let Some(name) = inner.strip_prefix(IMAGE_MARKER) {
        return Some((MediaKind::Image, name));
    }

    let rest = inner.strip_prefix(AUDIO_MARKER)?;
    // Trailing " m:ss" is display only
    let name = match rest.rsplit_once(' ') {
        Some((name, duration)) if is_duration(duration) => name,
        _ => rest,
    };
    Some((MediaKind::Audio, name))
}

fn is_duration(text: &str) -> bool {
    let mut parts = text.split(':');
    let valid = |p: Option<&str>| p.is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    valid(parts.next()) && valid(parts.next()) && parts.all(|p| valid(Some(p)))
}

/// A text line needs escaping when, without its leading `\`s, it reads as a marker
fn needs_escape(line: &str) -> bool {
    parse_marker(line.trim_start_matches(ESCAPE)).is_some()
}

fn escape_line(line: &str) -> String {
    if needs_escape(line) {
        format!("{}{}", ESCAPE, line)
    } else {
        line.to_string()
    }
}

fn unescape_line(line: &str) -> &str {
    match line.strip_prefix(ESCAPE) {
        Some(rest) if needs_escape(line) => rest,
        _ => line,
    }
}

/// `m:ss`
pub fn format_duration(duration_ms: i64) -> String {
    let total_secs = duration_ms.max(0) / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

/// Last component of a `/` or `\` separated path
pub fn basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blocks() -> Vec<ContentBlock> {
        vec![
            ContentBlock::text(0, "Morning walk"),
            ContentBlock::image(1, MediaRef::local("/data/images/park.jpg")),
            ContentBlock::text(2, "Birds everywhere"),
            ContentBlock::audio(3, MediaRef::local("/data/audio/birds.m4a"), 65_000),
        ]
    }

    fn kinds(blocks: &[ContentBlock]) -> Vec<BlockKind> {
        blocks.iter().map(|b| b.kind.clone()).collect()
    }

    fn image_item(path: &str) -> MediaItem {
        MediaItem {
            kind: MediaKind::Image,
            path: path.to_string(),
            duration_ms: None,
        }
    }

    #[test]
    fn test_blocks_to_legacy() {
        let legacy = blocks_to_legacy(&sample_blocks());

        assert_eq!(
            legacy.content,
            "Morning walk\n[图片:park.jpg]\nBirds everywhere\n[音频:birds.m4a 1:05]"
        );
        assert_eq!(legacy.media_items.len(), 2);
        assert_eq!(legacy.media_items[0].kind, MediaKind::Image);
        assert_eq!(legacy.media_items[1].duration_ms, Some(65_000));
    }

    #[test]
    fn test_legacy_roundtrip_preserves_sequence() {
        let cases = vec![
            sample_blocks(),
            vec![
                ContentBlock::text(0, "line one\nline two"),
                ContentBlock::image(1, MediaRef::local("/i/a.png")),
                ContentBlock::text(2, ""),
                ContentBlock::audio(3, MediaRef::local("/a/b.mp3"), 0),
            ],
            vec![
                ContentBlock::text(0, ""),
                ContentBlock::image(1, MediaRef::local("/i/a.png")),
                ContentBlock::image(2, MediaRef::local("/i/b.png")),
                ContentBlock::text(3, "trailing\n"),
            ],
            vec![
                ContentBlock::text(0, "[图片:a.png]\n\\[音频:x.mp3]\n\\plain"),
                ContentBlock::image(1, MediaRef::local("/i/a.png")),
            ],
        ];

        for original in cases {
            let legacy = blocks_to_legacy(&original);
            let decoded = decode_legacy(&legacy.content, &legacy.media_items);

            assert_eq!(kinds(&decoded.blocks), kinds(&original), "{:?}", legacy.content);
            assert!(decoded.unmatched_markers.is_empty());
            assert!(decoded.appended_items.is_empty());
            let orders: Vec<i64> = decoded.blocks.iter().map(|b| b.order).collect();
            assert_eq!(orders, (0..original.len() as i64).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_adjacent_text_blocks_merge() {
        let blocks = vec![
            ContentBlock::text(0, "first"),
            ContentBlock::text(1, ""),
            ContentBlock::image(2, MediaRef::local("/i/a.png")),
        ];

        let legacy = blocks_to_legacy(&blocks);
        let restored = legacy_to_blocks(&legacy.content, &legacy.media_items);

        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].kind, BlockKind::Text { text: "first\n".into() });
        assert!(matches!(restored[1].kind, BlockKind::Image { .. }));
    }

    #[test]
    fn test_markers_match_by_file_name() {
        let items = vec![
            image_item("/sdcard/notes/dog.jpg"),
            MediaItem {
                kind: MediaKind::Audio,
                path: "/sdcard/notes/rec 1.m4a".to_string(),
                duration_ms: Some(5000),
            },
            image_item("/sdcard/notes/cat.jpg"),
        ];

        let blocks = legacy_to_blocks(
            "hello\n[图片:cat.jpg]\n[音频:rec 1.m4a 0:05]\n[图片:dog.jpg]",
            &items,
        );

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[1].kind.media().unwrap().local_path, "/sdcard/notes/cat.jpg");
        assert_eq!(
            blocks[2].kind,
            BlockKind::Audio {
                media: MediaRef::local("/sdcard/notes/rec 1.m4a"),
                duration_ms: 5000
            }
        );
        assert_eq!(blocks[3].kind.media().unwrap().local_path, "/sdcard/notes/dog.jpg");
    }

    #[test]
    fn test_unpaired_markers_and_items_are_reported() {
        let items = vec![image_item("/x/kept.png"), image_item("/x/orphan.png")];

        let decoded = decode_legacy("[图片:missing.png]\nnote\n[图片:kept.png]", &items);

        assert_eq!(decoded.unmatched_markers, vec!["missing.png".to_string()]);
        assert_eq!(decoded.appended_items, vec!["/x/orphan.png".to_string()]);
        let types: Vec<&str> = decoded.blocks.iter().map(|b| b.kind.type_name()).collect();
        assert_eq!(types, ["text", "image", "image"]);
        assert_eq!(decoded.blocks[2].kind.media().unwrap().local_path, "/x/orphan.png");
    }

    #[test]
    fn test_empty_legacy_yields_single_text_block() {
        let blocks = legacy_to_blocks("", &[]);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Text { text: String::new() });
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/a/b/c.png"), "c.png");
        assert_eq!(basename("c:\\x\\y.wav"), "y.wav");
        assert_eq!(basename("plain.txt"), "plain.txt");
    }
}
