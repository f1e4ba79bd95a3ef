//! Storage module
//!
//! Provides file storage for media (images, audio recordings) and the
//! private temporary files used while exporting and importing.

pub mod media_store;
pub mod temp_files;

pub use media_store::MediaStore;
pub use temp_files::TempFileManager;
