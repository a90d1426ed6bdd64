//! redb table definitions and the encrypted store
//!
//! Every value is postcard-encoded and sealed with the store key before it
//! reaches disk. The associated data is `table/row-key`, so a value copied
//! under another row fails to open.

use std::path::{Path, PathBuf};

use chrono::Utc;
use redb::{Database, Durability, ReadTransaction, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use vitalis_crypto::{CredentialStore, KeyOrigin, StoreKey, StoreKeyManager};

use crate::error::{StorageError, StorageResult};
use crate::migrations;

/// Table names, also used as the first half of each row's associated data
pub mod names {
    pub const SCHEMA_META: &str = "schema_meta";
    pub const SCHEMA_MIGRATIONS: &str = "schema_migrations";
    pub const HEALTH_SNAPSHOTS: &str = "health_snapshots";
    pub const QUEST_PROGRESS: &str = "quest_progress";
    pub const QUEST_STREAKS: &str = "quest_streaks";
    pub const QUEST_HISTORY: &str = "quest_history";
    pub const QUEST_POINTS: &str = "quest_points";
    pub const BADGES: &str = "badges";
}

// Key: "key_check", Value: sealed sentinel
pub const SCHEMA_META: TableDefinition<&str, &[u8]> = TableDefinition::new(names::SCHEMA_META);

// Key: migration name, Value: applied-at unix millis
pub const SCHEMA_MIGRATIONS: TableDefinition<&str, i64> =
    TableDefinition::new(names::SCHEMA_MIGRATIONS);

// Key: YYYY-MM-DD, Value: sealed StoredSnapshot
pub const HEALTH_SNAPSHOTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new(names::HEALTH_SNAPSHOTS);

// Key: (quest_id, YYYY-MM-DD), Value: sealed QuestProgress
pub const QUEST_PROGRESS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new(names::QUEST_PROGRESS);

// Key: quest_id, Value: sealed Streak
pub const QUEST_STREAKS: TableDefinition<&str, &[u8]> =
    TableDefinition::new(names::QUEST_STREAKS);

// Key: monotonically increasing entry id, Value: sealed CompletedLog
pub const QUEST_HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new(names::QUEST_HISTORY);

// Key: reward tag, Value: sealed u64 balance
pub const QUEST_POINTS: TableDefinition<&str, &[u8]> = TableDefinition::new(names::QUEST_POINTS);

// Key: badge id, Value: sealed Badge
pub const BADGES: TableDefinition<&str, &[u8]> = TableDefinition::new(names::BADGES);

const KEY_CHECK: &str = "key_check";
const KEY_CHECK_PLAINTEXT: &[u8] = b"vitalis-store";

/// Commit durability for write transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreDurability {
    /// fsync on every commit
    #[default]
    Immediate,
    /// Commits become durable with a later immediate commit
    Eventual,
}

impl From<StoreDurability> for Durability {
    fn from(value: StoreDurability) -> Self {
        match value {
            StoreDurability::Immediate => Durability::Immediate,
            StoreDurability::Eventual => Durability::Eventual,
        }
    }
}

/// Configuration for the encrypted store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
    /// Durability applied to every write transaction
    pub durability: StoreDurability,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("vitalis.redb"),
            cache_size: 16 * 1024 * 1024, // 16MB
            durability: StoreDurability::Immediate,
        }
    }
}

impl StoreConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Default::default()
        }
    }
}

/// What happened while opening the store
#[derive(Debug, Clone)]
pub struct StoreOpenReport {
    /// How the store key was obtained
    pub key_origin: KeyOrigin,
    /// Where an unreadable database file was moved to, if any
    pub quarantined_file: Option<PathBuf>,
    /// Migrations applied during this open
    pub migrations_applied: Vec<String>,
    /// Migrations that failed and will be retried on the next open
    pub migrations_failed: Vec<String>,
}

impl StoreOpenReport {
    /// Whether previously stored data is no longer reachable
    pub fn lost_data(&self) -> bool {
        self.quarantined_file.is_some()
    }
}

/// The encrypted local store
pub struct EncryptedStore {
    db: Database,
    key: StoreKey,
    config: StoreConfig,
    report: StoreOpenReport,
}

impl EncryptedStore {
    /// Open or create the database, verify the key, and run migrations
    ///
    /// A database written under a different key is moved aside as
    /// `<file>.orphaned-<unix-secs>` and a fresh one takes its place.
    #[instrument(skip(config, key), fields(path = %config.db_path.display()))]
    pub fn open(config: StoreConfig, key: StoreKey, key_origin: KeyOrigin) -> StorageResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut quarantined_file = None;
        let db = match Self::open_verified(&config, &key) {
            Ok(db) => db,
            Err(StorageError::KeyMismatch) => {
                let moved = quarantine(&config.db_path)?;
                warn!(
                    orphaned = %moved.display(),
                    "Store key does not open the existing database; starting empty"
                );
                quarantined_file = Some(moved);
                Self::open_verified(&config, &key)?
            }
            Err(e) => return Err(e),
        };

        let mut store = Self {
            db,
            key,
            config,
            report: StoreOpenReport {
                key_origin,
                quarantined_file,
                migrations_applied: Vec::new(),
                migrations_failed: Vec::new(),
            },
        };

        let outcome = migrations::run_pending(&store);
        store.report.migrations_applied = outcome.applied;
        store.report.migrations_failed = outcome.failed;

        info!(
            applied = store.report.migrations_applied.len(),
            failed = store.report.migrations_failed.len(),
            "Opened encrypted store"
        );
        Ok(store)
    }

    /// Load (or create) the key through `keys`, then open
    pub fn open_with_keys<C: CredentialStore>(
        config: StoreConfig,
        keys: &StoreKeyManager<C>,
    ) -> StorageResult<Self> {
        let (key, origin) = keys.load_or_create()?;
        Self::open(config, key, origin)
    }

    fn open_verified(config: &StoreConfig, key: &StoreKey) -> StorageResult<Database> {
        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)?;
        init_tables(&db)?;
        verify_key(&db, key)?;
        Ok(db)
    }

    /// Get a reference to the database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// What happened during open
    pub fn open_report(&self) -> &StoreOpenReport {
        &self.report
    }

    /// Start a read snapshot
    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Run `f` inside one write transaction
    ///
    /// Commits when `f` returns `Ok`; otherwise aborts and nothing `f`
    /// wrote becomes visible.
    pub fn run_in_transaction<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&WriteTransaction) -> StorageResult<T>,
    {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(self.config.durability.into());

        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "Failed to abort write transaction");
                }
                debug!(error = %e, "Rolled back write transaction");
                Err(e)
            }
        }
    }

    /// Encode and seal a value for `table`/`row`
    pub fn seal<T: Serialize>(&self, table: &str, row: &str, value: &T) -> StorageResult<Vec<u8>> {
        let plain =
            postcard::to_allocvec(value).map_err(|e| StorageError::serialization(e.to_string()))?;
        Ok(self.key.seal(aad(table, row).as_bytes(), &plain)?)
    }

    /// Open and decode a value sealed by [`seal`](Self::seal)
    pub fn unseal<T: DeserializeOwned>(
        &self,
        table: &str,
        row: &str,
        sealed: &[u8],
    ) -> StorageResult<T> {
        let plain = self.key.open(aad(table, row).as_bytes(), sealed)?;
        postcard::from_bytes(&plain).map_err(|e| StorageError::deserialization(e.to_string()))
    }
}

fn aad(table: &str, row: &str) -> String {
    format!("{table}/{row}")
}

fn init_tables(db: &Database) -> StorageResult<()> {
    let write_txn = db.begin_write()?;
    write_txn.open_table(SCHEMA_META)?;
    write_txn.open_table(SCHEMA_MIGRATIONS)?;
    write_txn.open_table(HEALTH_SNAPSHOTS)?;
    write_txn.open_table(QUEST_PROGRESS)?;
    write_txn.open_table(QUEST_STREAKS)?;
    write_txn.open_table(QUEST_HISTORY)?;
    write_txn.open_table(QUEST_POINTS)?;
    write_txn.open_table(BADGES)?;
    write_txn.commit()?;

    debug!("Initialized redb tables");
    Ok(())
}

/// Check the sentinel row, writing it on first open
fn verify_key(db: &Database, key: &StoreKey) -> StorageResult<()> {
    let meta_aad = aad(names::SCHEMA_META, KEY_CHECK);

    let existing = {
        let read = db.begin_read()?;
        let table = read.open_table(SCHEMA_META)?;
        table.get(KEY_CHECK)?.map(|v| v.value().to_vec())
    };

    match existing {
        Some(sealed) => match key.open(meta_aad.as_bytes(), &sealed) {
            Ok(plain) if plain == KEY_CHECK_PLAINTEXT => Ok(()),
            _ => Err(StorageError::KeyMismatch),
        },
        None => {
            let sealed = key.seal(meta_aad.as_bytes(), KEY_CHECK_PLAINTEXT)?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(SCHEMA_META)?;
                table.insert(KEY_CHECK, sealed.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        }
    }
}

/// Move an unreadable database file out of the way
fn quarantine(path: &Path) -> StorageResult<PathBuf> {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".orphaned-{}", Utc::now().timestamp()));
    let target = PathBuf::from(name);
    std::fs::rename(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::test_support::open_temp;

    #[test]
    fn test_open_creates_file_and_runs_migrations() {
        let temp = TempDir::new().unwrap();
        let store = open_temp(&temp);

        assert!(temp.path().join("vitalis.redb").exists());
        let report = store.open_report();
        assert_eq!(report.key_origin, KeyOrigin::Created);
        assert!(report.quarantined_file.is_none());
        assert_eq!(report.migrations_applied.len(), migrations::MIGRATIONS.len());
        assert!(report.migrations_failed.is_empty());
    }

    #[test]
    fn test_reopen_with_same_key() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::with_path(temp.path().join("vitalis.redb"));
        let key = StoreKey::generate();

        let store = EncryptedStore::open(config.clone(), key.clone(), KeyOrigin::Created).unwrap();
        let sealed = store.seal(names::BADGES, "a", &7u64).unwrap();
        store
            .run_in_transaction(|txn| {
                let mut table = txn.open_table(BADGES)?;
                table.insert("a", sealed.as_slice())?;
                Ok(())
            })
            .unwrap();
        drop(store);

        let store = EncryptedStore::open(config, key, KeyOrigin::Loaded).unwrap();
        let report = store.open_report();
        assert!(report.quarantined_file.is_none());
        assert!(report.migrations_applied.is_empty());

        let read = store.begin_read().unwrap();
        let table = read.open_table(BADGES).unwrap();
        let raw = table.get("a").unwrap().unwrap();
        let value: u64 = store.unseal(names::BADGES, "a", raw.value()).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_wrong_key_quarantines_file() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::with_path(temp.path().join("vitalis.redb"));

        drop(EncryptedStore::open(config.clone(), StoreKey::generate(), KeyOrigin::Created).unwrap());

        let store = EncryptedStore::open(
            config,
            StoreKey::generate(),
            KeyOrigin::Regenerated {
                reason: "keychain locked".into(),
            },
        )
        .unwrap();

        let report = store.open_report();
        assert!(report.lost_data());
        let moved = report.quarantined_file.clone().unwrap();
        assert!(moved.exists());
        assert!(moved.to_string_lossy().contains(".orphaned-"));
        assert!(temp.path().join("vitalis.redb").exists());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let temp = TempDir::new().unwrap();
        let store = open_temp(&temp);

        let result: StorageResult<()> = store.run_in_transaction(|txn| {
            let mut table = txn.open_table(BADGES)?;
            table.insert("partial", &[1u8, 2, 3][..])?;
            Err(StorageError::not_found("forced"))
        });
        assert!(result.is_err());

        let read = store.begin_read().unwrap();
        let table = read.open_table(BADGES).unwrap();
        assert!(table.get("partial").unwrap().is_none());
    }

    #[test]
    fn test_unseal_rejects_other_row() {
        let temp = TempDir::new().unwrap();
        let store = open_temp(&temp);

        let sealed = store.seal("quest_points", "hydration", &10u64).unwrap();
        assert!(
            store
                .unseal::<u64>("quest_points", "fitness", &sealed)
                .is_err()
        );
    }
}
