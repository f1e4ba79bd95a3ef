//! XNote core library
//!
//! Note storage, secure archive export/import and the encrypted
//! configuration store of the XNote app.

pub mod app;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod logging;
pub mod security;
pub mod services;
pub mod storage;

pub use app::AppState;
pub use error::{AppError, Result};
