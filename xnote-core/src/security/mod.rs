//! Security module
//!
//! Archive validation, the encrypted configuration store and the key
//! sources backing it.

pub mod config_storage;
pub mod key_source;
pub mod validator;

pub use config_storage::SecureConfigStorage;
pub use key_source::{KeySource, KeyringKeySource, StaticKeySource};
pub use validator::{SecureFileValidator, ValidationResult};
