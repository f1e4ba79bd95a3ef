//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::config::AppPaths;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::security::{KeySource, SecureConfigStorage};
use crate::services::{AppSecurityConfig, ExportImportService, NotesService};
use crate::storage::{MediaStore, TempFileManager};
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub paths: AppPaths,
    pub repo: Repository,
    pub media: MediaStore,
    pub temp_files: Arc<TempFileManager>,
    pub secure_config: Arc<SecureConfigStorage>,
    pub notes_service: NotesService,
    pub export_import_service: ExportImportService,
    pub security_config: AppSecurityConfig,
}

impl AppState {
    /// Application setup - called once on startup
    pub async fn initialize(paths: AppPaths, key_source: &dyn KeySource) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", paths.data_dir);

        // Create necessary directories
        paths.ensure_dirs()?;

        let pool = create_pool(&paths.db_path).await?;
        let repo = Repository::new(pool);

        let media = MediaStore::new(paths.images_dir.clone(), paths.audio_dir.clone());
        media.initialize().await?;

        let temp_files = Arc::new(TempFileManager::new(paths.cache_dir.clone()));
        let secure_config = Arc::new(SecureConfigStorage::open(
            paths.secure_config_path.clone(),
            key_source,
        )?);

        let notes_service = NotesService::new(repo.clone(), media.clone());
        let export_import_service = ExportImportService::new(
            repo.clone(),
            media.clone(),
            temp_files.clone(),
            paths.exports_dir.clone(),
        );
        let security_config = AppSecurityConfig::new(secure_config.clone());

        for problem in security_config.validate_configuration() {
            tracing::warn!("Startup configuration check: {}", problem);
        }

        tracing::info!("Application initialized successfully");

        Ok(Self {
            paths,
            repo,
            media,
            temp_files,
            secure_config,
            notes_service,
            export_import_service,
            security_config,
        })
    }

    /// Release resources. Remaining temporary files are wiped.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application");

        let temp_files = self.temp_files.clone();
        match tokio::task::spawn_blocking(move || temp_files.cleanup_all()).await {
            Ok(0) => {}
            Ok(failures) => tracing::warn!("{} temporary files could not be removed", failures),
            Err(e) => tracing::warn!("Temporary file cleanup did not finish: {}", e),
        }

        self.repo.pool().close().await;
    }
}
