//! Secure-credential persistence for the store key
//!
//! The key is generated once and kept in a credential facility
//! (the platform keychain on devices, an owner-only file elsewhere).
//! If it cannot be read back a fresh key is generated; the caller is
//! told through [`KeyOrigin::Regenerated`] because anything sealed with
//! the old key is no longer readable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::store_key::{KEY_SIZE, StoreKey};

/// Default account name for the store key
pub const STORE_KEY_ACCOUNT: &str = "vitalis.store.key";

/// A place to keep small secrets
pub trait CredentialStore: Send + Sync {
    /// Read a secret; `Ok(None)` when nothing was ever stored
    fn load(&self, account: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>>;

    /// Store or replace a secret
    fn save(&self, account: &str, secret: &[u8]) -> CryptoResult<()>;
}

impl<C: CredentialStore + ?Sized> CredentialStore for Arc<C> {
    fn load(&self, account: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        (**self).load(account)
    }

    fn save(&self, account: &str, secret: &[u8]) -> CryptoResult<()> {
        (**self).save(account, secret)
    }
}

/// Credential store backed by owner-only files in a directory
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Keep credentials under `dir`
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, account: &str) -> PathBuf {
        let file: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.cred"))
    }

    #[cfg(unix)]
    fn set_restrictive_permissions(path: &Path) -> CryptoResult<()> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| CryptoError::Credential(format!("Failed to set permissions: {}", e)))
    }

    #[cfg(not(unix))]
    fn set_restrictive_permissions(_path: &Path) -> CryptoResult<()> {
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, account: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        let path = self.path_for(account);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| CryptoError::Credential(format!("Failed to read {}: {}", path.display(), e)))?;
        Ok(Some(Zeroizing::new(bytes)))
    }

    fn save(&self, account: &str, secret: &[u8]) -> CryptoResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CryptoError::Credential(format!("Failed to create credential dir: {}", e)))?;

        let path = self.path_for(account);
        std::fs::write(&path, secret)
            .map_err(|e| CryptoError::Credential(format!("Failed to write {}: {}", path.display(), e)))?;
        Self::set_restrictive_permissions(&path)?;

        debug!(path = %path.display(), "Saved credential");
        Ok(())
    }
}

/// Process-local credential store for tests
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
    fail_reads: Mutex<bool>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `load` fail, as a locked keychain would
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, account: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        if *self.fail_reads.lock() {
            return Err(CryptoError::Credential("credential store unavailable".to_string()));
        }
        Ok(self.entries.lock().get(account).cloned())
    }

    fn save(&self, account: &str, secret: &[u8]) -> CryptoResult<()> {
        self.entries
            .lock()
            .insert(account.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }
}

/// How the store key was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Read back from the credential store
    Loaded,
    /// First run: nothing was stored yet
    Created,
    /// A key existed (or may have) but could not be read; data sealed
    /// with the previous key is orphaned
    Regenerated { reason: String },
}

impl KeyOrigin {
    /// Whether previously sealed data may have become unreadable
    pub fn is_data_loss(&self) -> bool {
        matches!(self, KeyOrigin::Regenerated { .. })
    }
}

/// Loads the store key, generating it on first use
pub struct StoreKeyManager<C: CredentialStore> {
    credentials: C,
    account: String,
}

impl<C: CredentialStore> StoreKeyManager<C> {
    pub fn new(credentials: C) -> Self {
        Self {
            credentials,
            account: STORE_KEY_ACCOUNT.to_string(),
        }
    }

    /// Use a different credential account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Access the backing credential store
    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Load the existing key or create one
    ///
    /// A read failure or a malformed stored key does not abort: a new key
    /// is generated and saved, and the origin says so. Failing to save a
    /// new key is an error, since the key would be lost on next start.
    pub fn load_or_create(&self) -> CryptoResult<(StoreKey, KeyOrigin)> {
        let origin = match self.credentials.load(&self.account) {
            Ok(Some(bytes)) if bytes.len() == KEY_SIZE => {
                let key = StoreKey::from_slice(&bytes)?;
                debug!(account = %self.account, "Loaded store key");
                return Ok((key, KeyOrigin::Loaded));
            }
            Ok(Some(bytes)) => KeyOrigin::Regenerated {
                reason: format!("stored key has {} bytes, expected {}", bytes.len(), KEY_SIZE),
            },
            Ok(None) => KeyOrigin::Created,
            Err(e) => KeyOrigin::Regenerated {
                reason: e.to_string(),
            },
        };

        let key = StoreKey::generate();
        self.credentials.save(&self.account, key.as_bytes())?;

        match &origin {
            KeyOrigin::Regenerated { reason } => warn!(
                account = %self.account,
                reason = %reason,
                "Store key could not be retrieved; generated a new one, previously encrypted data is orphaned"
            ),
            _ => info!(account = %self.account, "Generated new store key"),
        }

        Ok((key, origin))
    }
}
