//! Repository layer for database operations
//!
//! This module provides CRUD operations for notes, their blocks and
//! categories. Multi-statement writes run inside a transaction.

use super::legacy::blocks_to_legacy;
use super::models::*;
use crate::config::DEFAULT_CATEGORY_ID;
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool (used by shutdown)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a new note
    pub async fn create_note(&self, req: CreateNoteRequest) -> Result<Note> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let new_note = NewNote {
            title: req.title,
            category: req
                .category
                .unwrap_or_else(|| DEFAULT_CATEGORY_ID.to_string()),
            created_at: now,
            updated_at: now,
            version: 1,
            blocks: req.blocks,
        };

        let mut tx = self.pool.begin().await?;
        let note = insert_note(&mut *tx, &id, new_note).await?;
        tx.commit().await?;

        tracing::debug!("Created note: {}", id);
        Ok(note)
    }

    /// Get a note by ID
    pub async fn get_note(&self, id: &str) -> Result<Note> {
        let row = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT id, title, category, created_at, updated_at, version
            FROM notes WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NoteNotFound(id.to_string()))?;

        let blocks = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT * FROM note_blocks WHERE note_id = ? ORDER BY position ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BlockRow::into_block)
        .collect();

        Ok(row.into_note(blocks))
    }

    /// List all notes, most recently updated first
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        let rows = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT id, title, category, created_at, updated_at, version
            FROM notes
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.attach_blocks(rows).await
    }

    /// List notes in one category
    pub async fn list_notes_by_category(&self, category: &str) -> Result<Vec<Note>> {
        let rows = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT id, title, category, created_at, updated_at, version
            FROM notes
            WHERE category = ?
            ORDER BY updated_at DESC
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        self.attach_blocks(rows).await
    }

    /// Case-insensitive substring search over title and flattened content.
    ///
    /// Case folding happens here rather than in SQL: SQLite's `lower()` and
    /// `LIKE` only fold ASCII letters.
    pub async fn search_notes(&self, query: &str) -> Result<Vec<Note>> {
        let needle = query.to_lowercase();

        let matching: HashSet<String> =
            sqlx::query_as::<_, (String, String, String)>("SELECT id, title, content FROM notes")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .filter(|(_, title, content)| {
                    title.to_lowercase().contains(&needle)
                        || content.to_lowercase().contains(&needle)
                })
                .map(|(id, _, _)| id)
                .collect();

        if matching.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT id, title, category, created_at, updated_at, version
            FROM notes
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.retain(|row| matching.contains(&row.id));

        self.attach_blocks(rows).await
    }

    /// Number of stored notes
    pub async fn count_notes(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Replace title, category and blocks of a note, bumping its version
    pub async fn update_note(&self, note: &Note) -> Result<Note> {
        let now = Utc::now();
        let blocks = normalize_blocks(note.blocks.clone());
        let legacy = blocks_to_legacy(&blocks);

        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE notes
            SET title = ?, category = ?, content = ?, updated_at = ?, version = version + 1
            WHERE id = ?
            "#,
        )
        .bind(&note.title)
        .bind(&note.category)
        .bind(&legacy.content)
        .bind(now)
        .bind(&note.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NoteNotFound(note.id.clone()));
        }

        sqlx::query("DELETE FROM note_blocks WHERE note_id = ?")
            .bind(&note.id)
            .execute(&mut *tx)
            .await?;

        insert_blocks(&mut *tx, &note.id, &blocks).await?;

        tx.commit().await?;

        tracing::debug!("Updated note: {}", note.id);
        self.get_note(&note.id).await
    }

    /// Delete a note and its blocks
    pub async fn delete_note(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::NoteNotFound(id.to_string()));
        }

        tracing::debug!("Deleted note: {}", id);
        Ok(())
    }

    /// Delete several notes in one transaction, returning how many existed
    pub async fn delete_notes(&self, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for id in ids {
            deleted += sqlx::query("DELETE FROM notes WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;

        tracing::debug!("Batch deleted {} of {} notes", deleted, ids.len());
        Ok(deleted)
    }

    /// Delete every note
    pub async fn delete_all_notes(&self) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM notes")
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Deleted all notes ({})", deleted);
        Ok(deleted)
    }

    /// Insert imported notes under fresh ids in a single transaction.
    ///
    /// With `replace_existing` every stored note is deleted first, inside
    /// the same transaction, so a failed import leaves the store untouched.
    pub async fn import_notes(
        &self,
        notes: Vec<NewNote>,
        replace_existing: bool,
    ) -> Result<Vec<Note>> {
        let mut tx = self.pool.begin().await?;

        if replace_existing {
            let removed = sqlx::query("DELETE FROM notes")
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tracing::debug!("Import replacing {} existing notes", removed);
        }

        let mut inserted = Vec::with_capacity(notes.len());
        for new_note in notes {
            let id = Uuid::new_v4().to_string();
            inserted.push(insert_note(&mut *tx, &id, new_note).await?);
        }

        tx.commit().await?;

        tracing::debug!("Imported {} notes", inserted.len());
        Ok(inserted)
    }

    /// Every local media path referenced by a stored block
    pub async fn referenced_media_paths(&self) -> Result<HashSet<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT local_path FROM note_blocks
            WHERE local_path IS NOT NULL AND local_path != ''
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(paths.into_iter().collect())
    }

    /// List categories, defaults first
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, name, is_default, created_at FROM categories
            ORDER BY is_default DESC, created_at ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    /// Get a category by ID
    pub async fn get_category(&self, id: &str) -> Result<Category> {
        sqlx::query_as::<_, Category>(
            "SELECT id, name, is_default, created_at FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::CategoryNotFound(id.to_string()))
    }

    /// Create a user category
    pub async fn create_category(&self, name: &str) -> Result<Category> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let category = sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (id, name, is_default, created_at)
            VALUES (?, ?, 0, ?)
            RETURNING id, name, is_default, created_at
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created category: {}", id);
        Ok(category)
    }

    /// Delete a category. Notes keep their category id.
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::CategoryNotFound(id.to_string()));
        }

        tracing::debug!("Deleted category: {}", id);
        Ok(())
    }

    async fn attach_blocks(&self, rows: Vec<NoteRow>) -> Result<Vec<Note>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let wanted: HashSet<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let mut by_note: HashMap<String, Vec<ContentBlock>> = HashMap::new();

        let block_rows = sqlx::query_as::<_, BlockRow>(
            "SELECT * FROM note_blocks ORDER BY note_id ASC, position ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        for block_row in block_rows {
            if wanted.contains(block_row.note_id.as_str()) {
                by_note
                    .entry(block_row.note_id.clone())
                    .or_default()
                    .push(block_row.into_block());
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let blocks = by_note.remove(&row.id).unwrap_or_default();
                row.into_note(blocks)
            })
            .collect())
    }
}

async fn insert_note(conn: &mut SqliteConnection, id: &str, new_note: NewNote) -> Result<Note> {
    let blocks = normalize_blocks(new_note.blocks);
    let legacy = blocks_to_legacy(&blocks);

    sqlx::query(
        r#"
        INSERT INTO notes (id, title, category, content, created_at, updated_at, version)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&new_note.title)
    .bind(&new_note.category)
    .bind(&legacy.content)
    .bind(new_note.created_at)
    .bind(new_note.updated_at)
    .bind(new_note.version)
    .execute(&mut *conn)
    .await?;

    insert_blocks(conn, id, &blocks).await?;

    Ok(Note {
        id: id.to_string(),
        title: new_note.title,
        category: new_note.category,
        created_at: new_note.created_at,
        updated_at: new_note.updated_at,
        version: new_note.version,
        blocks,
    })
}

async fn insert_blocks(
    conn: &mut SqliteConnection,
    note_id: &str,
    blocks: &[ContentBlock],
) -> Result<()> {
    for block in blocks {
        let media = block.kind.media();
        let (text, duration_ms) = match &block.kind {
            BlockKind::Text { text } => (Some(text.as_str()), None),
            BlockKind::Image { .. } => (None, None),
            BlockKind::Audio { duration_ms, .. } => (None, Some(*duration_ms)),
        };

        sqlx::query(
            r#"
            INSERT INTO note_blocks
                (id, note_id, kind, position, text, local_path, remote_url, alt, width, height, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&block.id)
        .bind(note_id)
        .bind(block.kind.type_name())
        .bind(block.order)
        .bind(text)
        .bind(media.map(|m| m.local_path.as_str()))
        .bind(media.and_then(|m| m.remote_url.as_deref()))
        .bind(media.and_then(|m| m.alt.as_deref()))
        .bind(media.and_then(|m| m.width))
        .bind(media.and_then(|m| m.height))
        .bind(duration_ms)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::initialize_database;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        Repository::new(pool)
    }

    fn text_note(title: &str, body: &str) -> CreateNoteRequest {
        CreateNoteRequest {
            title: title.to_string(),
            category: None,
            blocks: vec![ContentBlock::text(0, body)],
        }
    }

    fn new_note(title: &str) -> NewNote {
        let now = Utc::now();
        NewNote {
            title: title.to_string(),
            category: "work".to_string(),
            created_at: now,
            updated_at: now,
            version: 3,
            blocks: vec![
                ContentBlock::text(0, "imported"),
                ContentBlock::image(1, MediaRef::local("/data/images/a.png")),
            ],
        }
    }

    #[tokio::test]
    async fn test_create_and_get_note() {
        let repo = create_test_repo().await;

        let req = CreateNoteRequest {
            title: "Test Note".to_string(),
            category: Some("work".to_string()),
            blocks: vec![
                ContentBlock::text(0, "Hello"),
                ContentBlock::audio(1, MediaRef::local("/data/audio/r.m4a"), 5000),
            ],
        };

        let note = repo.create_note(req).await.unwrap();
        assert_eq!(note.title, "Test Note");
        assert_eq!(note.version, 1);

        let fetched = repo.get_note(&note.id).await.unwrap();
        assert_eq!(fetched.id, note.id);
        assert_eq!(fetched.category, "work");
        assert_eq!(fetched.blocks, note.blocks);
    }

    #[tokio::test]
    async fn test_create_without_blocks_inserts_empty_text() {
        let repo = create_test_repo().await;

        let note = repo
            .create_note(CreateNoteRequest {
                title: "Empty".to_string(),
                category: None,
                blocks: Vec::new(),
            })
            .await
            .unwrap();

        let fetched = repo.get_note(&note.id).await.unwrap();
        assert_eq!(fetched.category, DEFAULT_CATEGORY_ID);
        assert_eq!(fetched.blocks.len(), 1);
        assert_eq!(fetched.blocks[0].kind, BlockKind::Text { text: String::new() });
    }

    #[tokio::test]
    async fn test_get_missing_note() {
        let repo = create_test_repo().await;

        let result = repo.get_note("missing").await;
        assert!(matches!(result, Err(AppError::NoteNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_note_replaces_blocks() {
        let repo = create_test_repo().await;

        let mut note = repo.create_note(text_note("Original", "one")).await.unwrap();

        note.title = "Updated".to_string();
        note.blocks = vec![
            ContentBlock::text(0, "first"),
            ContentBlock::text(1, "second"),
        ];

        let updated = repo.update_note(&note).await.unwrap();
        assert_eq!(updated.title, "Updated");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.blocks.len(), 2);
        assert_eq!(updated.blocks[1].kind, BlockKind::Text { text: "second".into() });
    }

    #[tokio::test]
    async fn test_update_missing_note() {
        let repo = create_test_repo().await;

        let mut note = repo.create_note(text_note("x", "y")).await.unwrap();
        note.id = "missing".to_string();

        assert!(matches!(
            repo.update_note(&note).await,
            Err(AppError::NoteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_notes() {
        let repo = create_test_repo().await;

        for i in 1..=3 {
            repo.create_note(text_note(&format!("Note {}", i), "body"))
                .await
                .unwrap();
        }

        let notes = repo.list_notes().await.unwrap();
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().all(|n| n.blocks.len() == 1));
    }

    #[tokio::test]
    async fn test_search_matches_title_and_content() {
        let repo = create_test_repo().await;

        repo.create_note(text_note("Groceries", "milk and eggs"))
            .await
            .unwrap();
        repo.create_note(text_note("Meeting", "Discuss MILK supply"))
            .await
            .unwrap();
        repo.create_note(text_note("100% done", "nothing"))
            .await
            .unwrap();

        assert_eq!(repo.search_notes("milk").await.unwrap().len(), 2);
        assert_eq!(repo.search_notes("grocer").await.unwrap().len(), 1);
        assert_eq!(repo.search_notes("%").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let repo = create_test_repo().await;

        repo.create_note(text_note("ÉTÉ à Paris", "Straße"))
            .await
            .unwrap();
        repo.create_note(text_note("Winter", "ΣΟΦΙΑ visited"))
            .await
            .unwrap();

        assert_eq!(repo.search_notes("été").await.unwrap().len(), 1);
        assert_eq!(repo.search_notes("STRASSE").await.unwrap().len(), 0);
        assert_eq!(repo.search_notes("STRAßE").await.unwrap().len(), 1);
        assert_eq!(repo.search_notes("σοφια").await.unwrap().len(), 1);
        assert!(repo.search_notes("autumn").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_blocks() {
        let repo = create_test_repo().await;

        let note = repo.create_note(text_note("To Delete", "x")).await.unwrap();
        repo.delete_note(&note.id).await.unwrap();

        assert!(repo.get_note(&note.id).await.is_err());

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_blocks")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_batch_delete() {
        let repo = create_test_repo().await;

        let a = repo.create_note(text_note("a", "")).await.unwrap();
        let b = repo.create_note(text_note("b", "")).await.unwrap();
        repo.create_note(text_note("c", "")).await.unwrap();

        let deleted = repo
            .delete_notes(&[a.id, b.id, "missing".to_string()])
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(repo.count_notes().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_appends_with_fresh_ids() {
        let repo = create_test_repo().await;
        let existing = repo.create_note(text_note("keep", "")).await.unwrap();

        let imported = repo
            .import_notes(vec![new_note("one"), new_note("two")], false)
            .await
            .unwrap();

        assert_eq!(imported.len(), 2);
        assert!(imported.iter().all(|n| n.id != existing.id));
        assert_eq!(imported[0].version, 3);
        assert_eq!(repo.count_notes().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_import_replace_existing() {
        let repo = create_test_repo().await;
        for i in 0..5 {
            repo.create_note(text_note(&format!("old {}", i), ""))
                .await
                .unwrap();
        }

        repo.import_notes(vec![new_note("one"), new_note("two"), new_note("three")], true)
            .await
            .unwrap();

        let notes = repo.list_notes().await.unwrap();
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().all(|n| !n.title.starts_with("old")));
    }

    #[tokio::test]
    async fn test_failed_import_rolls_back() {
        let repo = create_test_repo().await;
        repo.create_note(text_note("survivor", "")).await.unwrap();

        let mut first = new_note("one");
        let mut second = new_note("two");
        // Same block id twice violates the primary key mid-transaction
        second.blocks[0].id = first.blocks[0].id.clone();
        first.blocks.truncate(1);

        let result = repo.import_notes(vec![first, second], true).await;
        assert!(result.is_err());

        let notes = repo.list_notes().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "survivor");
    }

    #[tokio::test]
    async fn test_referenced_media_paths() {
        let repo = create_test_repo().await;
        repo.import_notes(vec![new_note("one"), new_note("two")], false)
            .await
            .unwrap();

        let paths = repo.referenced_media_paths().await.unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths.contains("/data/images/a.png"));
    }

    #[tokio::test]
    async fn test_categories() {
        let repo = create_test_repo().await;

        let defaults = repo.list_categories().await.unwrap();
        assert_eq!(defaults.len(), 3);
        assert_eq!(defaults[0].id, "daily");
        assert!(defaults[0].is_default);

        let created = repo.create_category("Travel").await.unwrap();
        assert!(!created.is_default);
        assert_eq!(repo.get_category(&created.id).await.unwrap().name, "Travel");

        repo.delete_category(&created.id).await.unwrap();
        assert!(matches!(
            repo.delete_category(&created.id).await,
            Err(AppError::CategoryNotFound(_))
        ));
    }
}
