//! Encryption-at-rest boundary for analysis artifacts.
//!
//! When a document owner has not granted clear-text retention, every stored
//! field goes through this cipher. Both directions are total over possibly
//! empty strings: `encrypt("") == ""` and any decryption failure degrades to
//! `""` rather than raising — a lost key must never take the owning record
//! down with it.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// AES-256-GCM cipher over base64url tokens: `token = b64(nonce ‖ ciphertext)`.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LENGTH],
}

impl Cipher {
    /// Build from configuration: `ANALYSIS_DATA_KEY` (base64url, 32 bytes)
    /// when valid, else a deterministic key derived from `SESSION_SECRET` so
    /// development restarts keep stored data readable.
    pub fn from_env() -> Self {
        if let Ok(configured) = std::env::var("ANALYSIS_DATA_KEY") {
            if let Ok(raw) = URL_SAFE_NO_PAD.decode(configured.trim()) {
                if let Ok(key) = <[u8; KEY_LENGTH]>::try_from(raw.as_slice()) {
                    return Self { key };
                }
            }
            tracing::warn!("ANALYSIS_DATA_KEY is not a valid 32-byte base64url key, deriving from session secret");
        }
        let secret = std::env::var("SESSION_SECRET")
            .unwrap_or_else(|_| "dev-secret-key-change-in-production".to_string());
        Self::from_secret(&secret)
    }

    /// Derive a key as SHA-256 of an arbitrary secret string.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt a value into a storable token. Empty input stays empty.
    pub fn encrypt(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        match cipher.encrypt(nonce, value.as_bytes()) {
            Ok(ciphertext) => {
                let mut bytes = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
                bytes.extend_from_slice(&nonce_bytes);
                bytes.extend_from_slice(&ciphertext);
                URL_SAFE_NO_PAD.encode(bytes)
            }
            Err(_) => {
                tracing::error!("encryption failed, field stored empty");
                String::new()
            }
        }
    }

    /// Decrypt a token back to the original value. Any failure — bad base64,
    /// truncated payload, wrong key, corrupted tag — yields `""`.
    pub fn decrypt(&self, token: &str) -> String {
        if token.is_empty() {
            return String::new();
        }

        let Ok(bytes) = URL_SAFE_NO_PAD.decode(token.trim()) else {
            return String::new();
        };
        // AES-GCM auth tag is 16 bytes minimum
        if bytes.len() < NONCE_LENGTH + 16 {
            return String::new();
        }

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&bytes[..NONCE_LENGTH]);

        match cipher.decrypt(nonce, &bytes[NONCE_LENGTH..]) {
            Ok(plaintext) => String::from_utf8(plaintext).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = Cipher::from_secret("test-secret");
        let token = cipher.encrypt("Munkaszerződés, 2024. január 5.");
        assert_ne!(token, "Munkaszerződés, 2024. január 5.");
        assert_eq!(cipher.decrypt(&token), "Munkaszerződés, 2024. január 5.");
    }

    #[test]
    fn empty_string_passes_through() {
        let cipher = Cipher::from_secret("s");
        assert_eq!(cipher.encrypt(""), "");
        assert_eq!(cipher.decrypt(""), "");
    }

    #[test]
    fn wrong_key_degrades_to_empty() {
        let token = Cipher::from_secret("one").encrypt("confidential clause");
        assert_eq!(Cipher::from_secret("two").decrypt(&token), "");
    }

    #[test]
    fn garbage_token_degrades_to_empty() {
        let cipher = Cipher::from_secret("s");
        assert_eq!(cipher.decrypt("not base64 at all!!"), "");
        assert_eq!(cipher.decrypt("QUJD"), ""); // valid base64, too short
    }

    #[test]
    fn tokens_are_nonce_randomized() {
        let cipher = Cipher::from_secret("s");
        let a = cipher.encrypt("same text");
        let b = cipher.encrypt("same text");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a), cipher.decrypt(&b));
    }

    #[test]
    fn same_secret_decrypts_across_instances() {
        let token = Cipher::from_secret("stable").encrypt("kept readable");
        assert_eq!(Cipher::from_secret("stable").decrypt(&token), "kept readable");
    }
}
