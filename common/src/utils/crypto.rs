//! Data source credential cipher.
//!
//! Credentials are stored as base64 of `nonce || ciphertext` where the nonce
//! is 12 bytes and the ciphertext is AES-256-GCM output including its tag.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::errors::{AppError, AppResult};

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for data source passwords.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCipher { .. }")
    }
}

impl CredentialCipher {
    /// Creates a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Creates a cipher from a base64 encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> AppResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AppError::Config(format!("credential key is not valid base64: {}", e)))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            AppError::Config(format!(
                "credential key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(&key))
    }

    /// Encrypts a plaintext credential into its storage form.
    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal("credential encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypts a stored credential.
    ///
    /// # Errors
    /// Returns `AppError::Decryption` for malformed blobs or a mismatched key.
    /// The failure is not retryable.
    pub fn decrypt(&self, blob: &str) -> AppResult<String> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|e| AppError::Decryption(format!("invalid base64: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(AppError::Decryption("ciphertext too short".into()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Decryption("authentication failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| AppError::Decryption("plaintext is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = CredentialCipher::new(&[7u8; 32]);
        let blob = cipher.encrypt("s3cret!").unwrap();
        assert_ne!(blob, "s3cret!");
        assert_eq!(cipher.decrypt(&blob).unwrap(), "s3cret!");
    }

    #[test]
    fn test_wrong_key_is_decryption_error() {
        let blob = CredentialCipher::new(&[1u8; 32]).encrypt("pw").unwrap();
        let err = CredentialCipher::new(&[2u8; 32]).decrypt(&blob).unwrap_err();
        assert!(matches!(err, AppError::Decryption(_)));
    }

    #[test]
    fn test_truncated_blob_is_decryption_error() {
        let cipher = CredentialCipher::new(&[1u8; 32]);
        let err = cipher.decrypt(&STANDARD.encode([0u8; 8])).unwrap_err();
        assert!(matches!(err, AppError::Decryption(_)));
        assert!(matches!(cipher.decrypt("%%%"), Err(AppError::Decryption(_))));
    }

    #[test]
    fn test_key_length_is_checked() {
        let short = STANDARD.encode([0u8; 16]);
        assert!(matches!(
            CredentialCipher::from_base64_key(&short),
            Err(AppError::Config(_))
        ));
        let ok = STANDARD.encode([0u8; 32]);
        assert!(CredentialCipher::from_base64_key(&ok).is_ok());
    }
}
