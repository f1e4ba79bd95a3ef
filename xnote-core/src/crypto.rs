//! Cryptography primitives
//!
//! AES-256-GCM encryption under a raw 256-bit key (used by the secure
//! config store) and Argon2id password hashing (used for the export
//! password hint).

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use crate::error::{AppError, Result};
use rand::RngCore;

const NONCE_SIZE: usize = 12; // 96 bits for GCM
pub const KEY_SIZE: usize = 32; // 256 bits

/// Ciphertext together with the nonce it was sealed under
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Generate a fresh random 256-bit key
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt with AES-256-GCM. `aad` is authenticated but not encrypted.
pub fn encrypt_with_key(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| AppError::Crypto(format!("Cipher initialization failed: {}", e)))?;

    let mut nonce_bytes = vec![0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| AppError::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedData {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt data sealed by [`encrypt_with_key`]
pub fn decrypt_with_key(key: &[u8], encrypted: &EncryptedData, aad: &[u8]) -> Result<Vec<u8>> {
    if encrypted.nonce.len() != NONCE_SIZE {
        return Err(AppError::Crypto("Invalid nonce length".to_string()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| AppError::Crypto(format!("Cipher initialization failed: {}", e)))?;

    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted.ciphertext.as_ref(),
                aad,
            },
        )
        .map_err(|e| AppError::Crypto(format!("Decryption failed: {}", e)))
}

/// Hash a password with Argon2id into a PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Crypto(format!("Password hashing failed: {}", e)))
}

/// Check a password against a PHC string produced by [`hash_password`]
pub fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        tracing::warn!("Stored password hash is malformed");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
