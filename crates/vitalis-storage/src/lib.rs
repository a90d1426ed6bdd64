//! # Vitalis Storage
//!
//! Encrypted local persistence for the Vitalis wellness engine.
//!
//! ## Features
//!
//! - **EncryptedStore**: redb database whose values are sealed with the store key,
//!   with key verification, quarantine of unreadable files, and migrations
//! - **SnapshotRepository**: one health snapshot per local day
//! - **QuestRepository**: progress, streak, points, history, and badge reads
//! - **QuestLedger**: the atomic quest completion transaction
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vitalis_crypto::{MemoryCredentialStore, StoreKeyManager};
//! use vitalis_storage::{EncryptedStore, SnapshotRepository, StoreConfig};
//!
//! let keys = StoreKeyManager::new(MemoryCredentialStore::new());
//! let store = Arc::new(EncryptedStore::open_with_keys(StoreConfig::default(), &keys)?);
//! let snapshots = SnapshotRepository::new(store.clone());
//! let latest = snapshots.get_latest()?;
//! ```

pub mod error;
pub mod migrations;
pub mod quest;
pub mod snapshots;
pub mod tables;

// Re-exports
pub use error::{StorageError, StorageResult};
pub use migrations::{MIGRATIONS, Migration};
pub use quest::{QuestLedger, QuestRepository};
pub use snapshots::SnapshotRepository;
pub use tables::{EncryptedStore, StoreConfig, StoreDurability, StoreOpenReport};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;
    use vitalis_crypto::{KeyOrigin, StoreKey};

    use crate::tables::{EncryptedStore, StoreConfig};

    pub fn open_temp(temp: &TempDir) -> Arc<EncryptedStore> {
        Arc::new(
            EncryptedStore::open(
                StoreConfig::with_path(temp.path().join("vitalis.redb")),
                StoreKey::generate(),
                KeyOrigin::Created,
            )
            .unwrap(),
        )
    }
}
