//! Symmetric encryption for credentials and email addresses at rest.
//!
//! Values are sealed with ChaCha20-Poly1305 under a key derived from the
//! service passphrase, and stored as `base64(nonce || ciphertext)`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Secret key must not be empty")]
    EmptyKey,

    #[error("Encryption failed")]
    Encrypt,

    /// Wrong key or tampered ciphertext.
    #[error("Decryption failed")]
    Decrypt,

    #[error("Ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Ciphertext too short")]
    Truncated,

    #[error("Decrypted value is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub struct SecretBox {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(digest.as_slice())),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, CryptoError> {
        let bytes = STANDARD.decode(sealed.trim())?;
        if bytes.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}
