//! Services module
//!
//! Business logic services that coordinate between the repository, the
//! media store and the secure storage layers.

pub mod export_import;
pub mod notes;
pub mod security_config;

pub use export_import::{
    password_requirements, validate_password, ExportImportService, ExportResult, ImportErrorKind,
    ImportResult,
};
pub use notes::{derive_title, render_markdown, render_plain_text, NotesService};
pub use security_config::AppSecurityConfig;
