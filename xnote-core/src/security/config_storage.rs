//! Encrypted key-value configuration store
//!
//! Small secrets (password hints, security toggles) are kept in a JSON
//! file where every value is sealed with AES-256-GCM under a root key
//! from a [`KeySource`]. The entry name is bound as associated data, so a
//! ciphertext moved to another entry fails to decrypt.
//!
//! Reads never fail: anything missing or undecryptable yields the
//! caller's default. Writes report success as a `bool`.

use super::key_source::KeySource;
use crate::crypto::{decrypt_with_key, encrypt_with_key, EncryptedData, KEY_SIZE};
use crate::error::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const FILE_FORMAT_VERSION: u32 = 1;

/// One sealed value as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedValue {
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, SealedValue>,
}

/// Encrypted configuration store backed by one JSON file
pub struct SecureConfigStorage {
    path: PathBuf,
    key: [u8; KEY_SIZE],
    entries: RwLock<BTreeMap<String, SealedValue>>,
}

impl SecureConfigStorage {
    /// Open (or create) the store at `path`.
    ///
    /// Failing to obtain the root key is fatal. A file that cannot be
    /// parsed is logged and replaced by an empty store on the next write.
    pub fn open(path: impl Into<PathBuf>, key_source: &dyn KeySource) -> Result<Self> {
        let path = path.into();
        let key = key_source.load_key()?;
        let entries = load_entries(&path);

        tracing::info!(
            "Secure config opened at {:?} ({} entries)",
            path,
            entries.len()
        );

        Ok(Self {
            path,
            key,
            entries: RwLock::new(entries),
        })
    }

    pub fn put_secure_string(&self, key: &str, value: &str) -> bool {
        self.put(key, value.as_bytes())
    }

    pub fn get_secure_string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn put_secure_bool(&self, key: &str, value: bool) -> bool {
        self.put(key, value.to_string().as_bytes())
    }

    pub fn get_secure_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn put_secure_int(&self, key: &str, value: i64) -> bool {
        self.put(key, value.to_string().as_bytes())
    }

    pub fn get_secure_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn remove_secure(&self, key: &str) -> bool {
        let name = sanitize_key(key);
        let mut entries = self.entries.write();

        let Some(previous) = entries.remove(&name) else {
            return true;
        };

        if let Err(e) = persist(&self.path, &entries) {
            tracing::error!("Failed to remove config entry {}: {}", name, e);
            entries.insert(name, previous);
            return false;
        }

        true
    }

    pub fn contains_secure(&self, key: &str) -> bool {
        self.entries.read().contains_key(&sanitize_key(key))
    }

    /// Drop every stored value
    pub fn clear_all(&self) -> bool {
        let mut entries = self.entries.write();
        let previous = std::mem::take(&mut *entries);

        if let Err(e) = persist(&self.path, &entries) {
            tracing::error!("Failed to clear secure config: {}", e);
            *entries = previous;
            return false;
        }

        tracing::info!("Secure config cleared");
        true
    }

    /// Encrypt arbitrary bytes under the store's root key
    pub fn encrypt_data(&self, data: &[u8]) -> Result<EncryptedData> {
        encrypt_with_key(&self.key, data, b"")
    }

    /// Decrypt bytes sealed by [`SecureConfigStorage::encrypt_data`]
    pub fn decrypt_data(&self, encrypted: &EncryptedData) -> Result<Vec<u8>> {
        decrypt_with_key(&self.key, encrypted, b"")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&self, key: &str, plaintext: &[u8]) -> bool {
        let name = sanitize_key(key);

        let sealed = match encrypt_with_key(&self.key, plaintext, name.as_bytes()) {
            Ok(data) => SealedValue {
                nonce: STANDARD.encode(&data.nonce),
                ciphertext: STANDARD.encode(&data.ciphertext),
            },
            Err(e) => {
                tracing::error!("Failed to encrypt config entry {}: {}", name, e);
                return false;
            }
        };

        let mut entries = self.entries.write();
        let previous = entries.insert(name.clone(), sealed);

        if let Err(e) = persist(&self.path, &entries) {
            tracing::error!("Failed to store config entry {}: {}", name, e);
            match previous {
                Some(value) => entries.insert(name, value),
                None => entries.remove(&name),
            };
            return false;
        }

        true
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let name = sanitize_key(key);
        let sealed = self.entries.read().get(&name).cloned()?;

        let encrypted = match (
            STANDARD.decode(&sealed.nonce),
            STANDARD.decode(&sealed.ciphertext),
        ) {
            (Ok(nonce), Ok(ciphertext)) => EncryptedData { nonce, ciphertext },
            _ => {
                tracing::warn!("Config entry {} is not valid base64", name);
                return None;
            }
        };

        match decrypt_with_key(&self.key, &encrypted, name.as_bytes()) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::warn!("Failed to decrypt config entry {}: {}", name, e);
                None
            }
        }
    }
}

/// Map an entry name onto `[A-Za-z0-9_]`
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn load_entries(path: &Path) -> BTreeMap<String, SealedValue> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::error!("Failed to read secure config {:?}: {}", path, e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<ConfigFile>(&content) {
        Ok(file) => file.entries,
        Err(e) => {
            tracing::error!("Secure config {:?} is corrupt, starting empty: {}", path, e);
            BTreeMap::new()
        }
    }
}

fn persist(path: &Path, entries: &BTreeMap<String, SealedValue>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = ConfigFile {
        version: FILE_FORMAT_VERSION,
        entries: entries.clone(),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    // Write to temp file first (atomic write)
    let temp_path = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut handle = options.open(&temp_path)?;
    handle.write_all(&json)?;
    handle.sync_all()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}
