//! Root key providers
//!
//! The secure config store never keeps its AES key on disk next to the
//! data. The key comes from a [`KeySource`]: normally the OS credential
//! store, or a fixed key injected by the caller.

use crate::crypto::{generate_key, KEY_SIZE};
use crate::error::{AppError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use keyring::mock::MockCredential;
use keyring::Entry;

const SERVICE_NAME: &str = "XNote";
const CONFIG_KEY_ACCOUNT: &str = "secure_config_key";

/// Supplies the 256-bit root key of the secure config store
pub trait KeySource: Send + Sync {
    fn load_key(&self) -> Result<[u8; KEY_SIZE]>;
}

/// Key kept base64-encoded in the OS credential store, created on first use
pub struct KeyringKeySource {
    service: String,
    account: String,
}

impl KeyringKeySource {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    /// Entry in the platform credential store. The keyring crate's
    /// in-memory mock store is refused: a key kept there is gone when the
    /// process exits, and everything sealed with it with the key.
    fn entry(&self) -> Result<Entry> {
        let entry = Entry::new(&self.service, &self.account)
            .map_err(|e| AppError::KeyStore(format!("Failed to create keyring entry: {}", e)))?;

        if entry
            .get_credential()
            .downcast_ref::<MockCredential>()
            .is_some()
        {
            return Err(AppError::KeyStore(
                "No persistent credential store on this platform".to_string(),
            ));
        }

        Ok(entry)
    }

    /// Remove the stored key. Data encrypted under it becomes unreadable.
    pub fn delete_key(&self) -> Result<()> {
        self.entry()?
            .delete_credential()
            .map_err(|e| AppError::KeyStore(format!("Failed to delete key: {}", e)))?;

        tracing::info!("Config key deleted from credential manager");
        Ok(())
    }
}

impl Default for KeyringKeySource {
    fn default() -> Self {
        Self::new(SERVICE_NAME, CONFIG_KEY_ACCOUNT)
    }
}

impl KeySource for KeyringKeySource {
    fn load_key(&self) -> Result<[u8; KEY_SIZE]> {
        let entry = self.entry()?;

        match entry.get_password() {
            Ok(encoded) => decode_key(&encoded),
            Err(keyring::Error::NoEntry) => {
                let key = generate_key();
                entry
                    .set_password(&STANDARD.encode(key))
                    .map_err(|e| AppError::KeyStore(format!("Failed to store key: {}", e)))?;

                // Read back through a fresh entry so a store that drops
                // writes fails here instead of on the next start
                let stored = self
                    .entry()?
                    .get_password()
                    .map_err(|e| AppError::KeyStore(format!("Stored key not readable: {}", e)))?;
                if decode_key(&stored)? != key {
                    return Err(AppError::KeyStore(
                        "Credential store returned a different key".to_string(),
                    ));
                }

                tracing::info!("Generated new config key in credential manager");
                Ok(key)
            }
            Err(e) => Err(AppError::KeyStore(format!("Failed to retrieve key: {}", e))),
        }
    }
}

/// Fixed key supplied by the caller
#[derive(Clone)]
pub struct StaticKeySource {
    key: [u8; KEY_SIZE],
}

impl StaticKeySource {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Fresh random key, mostly useful in tests
    pub fn random() -> Self {
        Self::new(generate_key())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        decode_key(encoded).map(Self::new)
    }
}

impl KeySource for StaticKeySource {
    fn load_key(&self) -> Result<[u8; KEY_SIZE]> {
        Ok(self.key)
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::KeyStore(format!("Invalid base64 key: {}", e)))?;

    if bytes.len() != KEY_SIZE {
        return Err(AppError::KeyStore(format!(
            "Key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
