//! Database module
//!
//! This module provides all persistence functionality including:
//! - Schema and migrations
//! - Model definitions
//! - The legacy flat-content codec
//! - Repository layer for CRUD operations

pub mod legacy;
pub mod models;
pub mod repository;
pub mod schema;

pub use legacy::{
    basename, blocks_to_legacy, decode_legacy, format_duration, legacy_to_blocks, DecodedLegacy,
    LegacyContent,
};
pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Connections kept by the application pool
const POOL_SIZE: u32 = 5;

/// Open (or create) the database file and bring its schema up to date.
///
/// Journal mode, foreign keys and the busy timeout are part of the connect
/// options, so every pooled connection gets them when it is opened.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Creating database connection pool at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .connect_with(options)
        .await?;

    initialize_database(&pool).await?;

    tracing::info!("Database pool created successfully");

    Ok(pool)
}
