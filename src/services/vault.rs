use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size
const TAG_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: authentication tag mismatch or corrupt blob")]
    DecryptionFailed,
    #[error("Invalid ciphertext blob: {0}")]
    InvalidBlob(String),
}

/// Authenticated symmetric encryption for credential columns.
/// Uses AES-256-GCM with a fresh random nonce per call; the stored blob is
/// `base64(nonce || tag || ciphertext)`.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Derives the 256-bit key by zero-padding or truncating the configured
    /// secret to 32 bytes. This is a fixed operational rule for this system,
    /// not a key-derivation function; changing it invalidates every stored
    /// blob.
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; 32];
        let bytes = secret.as_bytes();
        let len = bytes.len().min(32);
        key[..len].copy_from_slice(&bytes[..len]);

        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext; reorder so the blob is
        // nonce || tag || ciphertext.
        let (ct, tag) = ciphertext.split_at(ciphertext.len() - TAG_SIZE);
        let mut blob = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + ct.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(tag);
        blob.extend_from_slice(ct);

        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let raw = BASE64
            .decode(blob)
            .map_err(|e| CryptoError::InvalidBlob(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidBlob(
                "blob too short to contain nonce and tag".to_string(),
            ));
        }

        let (nonce_bytes, rest) = raw.split_at(NONCE_SIZE);
        let (tag, ct) = rest.split_at(TAG_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut ciphertext = Vec::with_capacity(ct.len() + TAG_SIZE);
        ciphertext.extend_from_slice(ct);
        ciphertext.extend_from_slice(tag);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::InvalidBlob(format!("invalid UTF-8 plaintext: {e}")))
    }
}
