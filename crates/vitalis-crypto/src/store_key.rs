//! Store encryption key
//!
//! Sealed rows are `nonce || ciphertext`, encrypted with ChaCha20-Poly1305.
//! The caller supplies associated data (table and row key) so a sealed
//! value cannot be copied under a different key without failing to open.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Poly1305 tag size
pub const TAG_SIZE: usize = 16;

/// Symmetric key for at-rest encryption of the local store
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StoreKey {
    key: [u8; KEY_SIZE],
}

impl StoreKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Create from raw key bytes
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Create from a slice, checking the width
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, bytes.len()))
        })?;
        Ok(Self { key })
    }

    /// Get the raw key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Encrypt `plaintext` bound to `aad`
    ///
    /// Returns the nonce concatenated with the ciphertext.
    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a value produced by [`seal`](Self::seal) with the same `aad`
    pub fn open(&self, aad: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DataTooShort {
                expected: NONCE_SIZE + TAG_SIZE,
                actual: sealed.len(),
            });
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher()
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = StoreKey::generate();
        let sealed = key.seal(b"health_snapshots/2024-01-01", b"payload").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"payload");
        let opened = key.open(b"health_snapshots/2024-01-01", &sealed).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = StoreKey::generate();
        let sealed = key.seal(b"quest_points/hydration", b"42").unwrap();
        assert!(matches!(
            key.open(b"quest_points/fitness", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = StoreKey::generate().seal(b"a", b"secret").unwrap();
        assert!(StoreKey::generate().open(b"a", &sealed).is_err());
    }

    #[test]
    fn test_short_data() {
        let key = StoreKey::generate();
        assert!(matches!(
            key.open(b"", &[0u8; 8]),
            Err(CryptoError::DataTooShort { actual: 8, .. })
        ));
    }

    #[test]
    fn test_from_slice_checks_width() {
        assert!(StoreKey::from_slice(&[7u8; KEY_SIZE]).is_ok());
        assert!(matches!(
            StoreKey::from_slice(&[7u8; 16]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = StoreKey::from_bytes([0xAB; KEY_SIZE]);
        assert!(!format!("{:?}", key).contains("171"));
    }
}
