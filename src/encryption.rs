//! Fernet cipher facade for secret values.
//!
//! Secrets are encrypted at rest with a single long-lived symmetric key: a
//! URL-safe base64-encoded 32-byte Fernet key (AES-128-CBC + HMAC-SHA256
//! tokens). Tokens are opaque strings to the store. A malformed key is a
//! hard error at construction; a malformed token is a hard error on decrypt.

use fernet::Fernet;

use crate::error::{Result, VaultError};

/// Symmetric cipher used for secret values.
pub struct Encryptor {
    fernet: Fernet,
}

impl Encryptor {
    /// Build an encryptor from a URL-safe base64 32-byte key string.
    pub fn new(key: &str) -> Result<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(VaultError::Encryption("encryption key is empty".into()));
        }
        let fernet = Fernet::new(key)
            .ok_or_else(|| VaultError::Encryption("invalid Fernet key".into()))?;
        Ok(Self { fernet })
    }

    /// Generate a fresh random key, suitable for `ENCRYPTION_KEY`.
    pub fn generate_key() -> String {
        Fernet::generate_key()
    }

    /// Encrypt a plaintext into an opaque token.
    pub fn encrypt(&self, plaintext: &str) -> String {
        self.fernet.encrypt(plaintext.as_bytes())
    }

    /// Decrypt a token back into its plaintext. Fails on a token produced
    /// under a different key or tampered with in transit.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let bytes = self
            .fernet
            .decrypt(token)
            .map_err(|_| VaultError::Encryption("invalid token or wrong key".into()))?;
        String::from_utf8(bytes)
            .map_err(|_| VaultError::Encryption("decrypted value is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let enc = Encryptor::new(&Encryptor::generate_key()).unwrap();
        let token = enc.encrypt("hunter2");
        assert_ne!(token, "hunter2");
        assert_eq!(enc.decrypt(&token).unwrap(), "hunter2");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let enc_a = Encryptor::new(&Encryptor::generate_key()).unwrap();
        let enc_b = Encryptor::new(&Encryptor::generate_key()).unwrap();
        let token = enc_a.encrypt("payload");
        assert!(enc_b.decrypt(&token).is_err());
    }

    #[test]
    fn malformed_key_is_rejected_at_construction() {
        assert!(Encryptor::new("").is_err());
        assert!(Encryptor::new("not-base64!").is_err());
        assert!(Encryptor::new("dG9vc2hvcnQ=").is_err());
    }

    #[test]
    fn malformed_token_is_rejected() {
        let enc = Encryptor::new(&Encryptor::generate_key()).unwrap();
        assert!(enc.decrypt("garbage-token").is_err());
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let enc = Encryptor::new(&Encryptor::generate_key()).unwrap();
        let token = enc.encrypt("");
        assert_eq!(enc.decrypt(&token).unwrap(), "");
    }
}
