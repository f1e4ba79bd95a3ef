//! Security settings service
//!
//! Typed application security settings kept in the encrypted
//! configuration store.

use crate::config::{
    DEFAULT_SESSION_TIMEOUT_MINUTES, MAX_SESSION_TIMEOUT_MINUTES, MIN_SESSION_TIMEOUT_MINUTES,
};
use crate::crypto;
use crate::error::{AppError, Result};
use crate::security::SecureConfigStorage;
use std::sync::Arc;

const KEY_EXPORT_PASSWORD_HASH: &str = "last_export_pwd_hash";
const KEY_AUTO_BACKUP: &str = "auto_backup_enabled";
const KEY_BIOMETRIC_AUTH: &str = "biometric_auth_enabled";
const KEY_SESSION_TIMEOUT: &str = "session_timeout_minutes";

/// Service for security related settings
#[derive(Clone)]
pub struct AppSecurityConfig {
    storage: Arc<SecureConfigStorage>,
}

impl AppSecurityConfig {
    pub fn new(storage: Arc<SecureConfigStorage>) -> Self {
        Self { storage }
    }

    /// Remember the last export password as an Argon2 hash
    pub fn set_export_password(&self, password: &str) -> Result<()> {
        let hash = crypto::hash_password(password)?;
        if !self.storage.put_secure_string(KEY_EXPORT_PASSWORD_HASH, &hash) {
            return Err(AppError::Generic(
                "Failed to save export password".to_string(),
            ));
        }
        tracing::debug!("Export password hash updated");
        Ok(())
    }

    pub fn has_export_password(&self) -> bool {
        self.storage.contains_secure(KEY_EXPORT_PASSWORD_HASH)
    }

    /// Check a password against the remembered export password.
    /// False when none is stored.
    pub fn verify_export_password(&self, password: &str) -> bool {
        let hash = self.storage.get_secure_string(KEY_EXPORT_PASSWORD_HASH, "");
        if hash.is_empty() {
            return false;
        }
        crypto::verify_password(password, &hash)
    }

    pub fn clear_export_password(&self) -> bool {
        self.storage.remove_secure(KEY_EXPORT_PASSWORD_HASH)
    }

    pub fn auto_backup_enabled(&self) -> bool {
        self.storage.get_secure_bool(KEY_AUTO_BACKUP, false)
    }

    pub fn set_auto_backup_enabled(&self, enabled: bool) -> bool {
        self.storage.put_secure_bool(KEY_AUTO_BACKUP, enabled)
    }

    pub fn biometric_auth_enabled(&self) -> bool {
        self.storage.get_secure_bool(KEY_BIOMETRIC_AUTH, false)
    }

    pub fn set_biometric_auth_enabled(&self, enabled: bool) -> bool {
        self.storage.put_secure_bool(KEY_BIOMETRIC_AUTH, enabled)
    }

    /// Session timeout in minutes. Out-of-range stored values read as the default.
    pub fn session_timeout_minutes(&self) -> i64 {
        let minutes = self
            .storage
            .get_secure_int(KEY_SESSION_TIMEOUT, DEFAULT_SESSION_TIMEOUT_MINUTES);
        if is_valid_timeout(minutes) {
            minutes
        } else {
            DEFAULT_SESSION_TIMEOUT_MINUTES
        }
    }

    pub fn set_session_timeout_minutes(&self, minutes: i64) -> Result<()> {
        if !is_valid_timeout(minutes) {
            return Err(AppError::Generic(format!(
                "Session timeout must be between {} and {} minutes",
                MIN_SESSION_TIMEOUT_MINUTES, MAX_SESSION_TIMEOUT_MINUTES
            )));
        }
        if !self.storage.put_secure_int(KEY_SESSION_TIMEOUT, minutes) {
            return Err(AppError::Generic(
                "Failed to save session timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// Check stored values, returns a description of each problem found
    pub fn validate_configuration(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let minutes = self
            .storage
            .get_secure_int(KEY_SESSION_TIMEOUT, DEFAULT_SESSION_TIMEOUT_MINUTES);
        if !is_valid_timeout(minutes) {
            problems.push(format!("Session timeout out of range: {}", minutes));
        }

        if self.has_export_password() {
            let hash = self.storage.get_secure_string(KEY_EXPORT_PASSWORD_HASH, "");
            if argon2::PasswordHash::new(&hash).is_err() {
                problems.push("Export password hash is malformed".to_string());
            }
        }

        for problem in &problems {
            tracing::warn!("Security configuration: {}", problem);
        }
        problems
    }

    /// Reset every security setting to its default
    pub fn clear_all(&self) -> bool {
        tracing::info!("Clearing security configuration");
        self.storage.clear_all()
    }
}

fn is_valid_timeout(minutes: i64) -> bool {
    (MIN_SESSION_TIMEOUT_MINUTES..=MAX_SESSION_TIMEOUT_MINUTES).contains(&minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::StaticKeySource;
    use tempfile::TempDir;

    fn create_test_config() -> (AppSecurityConfig, Arc<SecureConfigStorage>, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(
            SecureConfigStorage::open(
                temp.path().join("secure_config.json"),
                &StaticKeySource::random(),
            )
            .unwrap(),
        );
        (AppSecurityConfig::new(storage.clone()), storage, temp)
    }

    #[test]
    fn test_defaults() {
        let (config, _, _temp) = create_test_config();

        assert!(!config.auto_backup_enabled());
        assert!(!config.biometric_auth_enabled());
        assert!(!config.has_export_password());
        assert_eq!(config.session_timeout_minutes(), 30);
        assert!(config.validate_configuration().is_empty());
    }

    #[test]
    fn test_export_password_hash() {
        let (config, storage, _temp) = create_test_config();

        config.set_export_password("Str0ngPassw0rd").unwrap();

        assert!(config.verify_export_password("Str0ngPassw0rd"));
        assert!(!config.verify_export_password("Wr0ngPassw0rd"));
        let stored = storage.get_secure_string(KEY_EXPORT_PASSWORD_HASH, "");
        assert!(stored.starts_with("$argon2"));
        assert!(!stored.contains("Str0ngPassw0rd"));

        assert!(config.clear_export_password());
        assert!(!config.verify_export_password("Str0ngPassw0rd"));
    }

    #[test]
    fn test_session_timeout_range() {
        let (config, _, _temp) = create_test_config();

        config.set_session_timeout_minutes(90).unwrap();
        assert_eq!(config.session_timeout_minutes(), 90);

        assert!(config.set_session_timeout_minutes(0).is_err());
        assert!(config.set_session_timeout_minutes(1441).is_err());
        assert_eq!(config.session_timeout_minutes(), 90);
    }

    #[test]
    fn test_validate_reports_bad_values() {
        let (config, storage, _temp) = create_test_config();

        storage.put_secure_int(KEY_SESSION_TIMEOUT, 5000);
        storage.put_secure_string(KEY_EXPORT_PASSWORD_HASH, "not a hash");

        assert_eq!(config.validate_configuration().len(), 2);
        assert_eq!(config.session_timeout_minutes(), 30);
    }

    #[test]
    fn test_toggles_and_clear_all() {
        let (config, _, _temp) = create_test_config();

        assert!(config.set_auto_backup_enabled(true));
        assert!(config.set_biometric_auth_enabled(true));
        assert!(config.auto_backup_enabled());
        assert!(config.biometric_auth_enabled());

        assert!(config.clear_all());
        assert!(!config.auto_backup_enabled());
        assert!(!config.biometric_auth_enabled());
    }
}
