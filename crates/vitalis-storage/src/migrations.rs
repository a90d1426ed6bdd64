//! Schema migrations
//!
//! Migrations are named, recorded in `schema_migrations` once applied, and
//! run at open in declaration order. Each runs in its own write
//! transaction. A failure is logged and leaves the migration unrecorded,
//! so it is retried on the next open; it never prevents the store from
//! opening.

use chrono::Utc;
use redb::{ReadableTable, WriteTransaction};
use tracing::{info, warn};

use crate::error::StorageResult;
use crate::snapshots::StoredSnapshot;
use crate::tables::{EncryptedStore, HEALTH_SNAPSHOTS, SCHEMA_MIGRATIONS, names};

/// A named, idempotent upgrade step
pub struct Migration {
    pub name: &'static str,
    apply: fn(&EncryptedStore, &WriteTransaction) -> StorageResult<usize>,
}

/// All migrations, in the order they run
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_snapshot_sleep_detail",
        apply: add_sleep_detail,
    },
    Migration {
        name: "0002_snapshot_wellness_metrics",
        apply: add_wellness_metrics,
    },
];

/// Names of applied and failed migrations from one run
#[derive(Debug, Default)]
pub struct MigrationOutcome {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
}

pub(crate) fn run_pending(store: &EncryptedStore) -> MigrationOutcome {
    let mut outcome = MigrationOutcome::default();

    for migration in MIGRATIONS {
        match apply_one(store, migration) {
            Ok(Some(rows)) => {
                info!(migration = migration.name, rows, "Applied migration");
                outcome.applied.push(migration.name.to_string());
            }
            Ok(None) => {}
            Err(e) => {
                warn!(migration = migration.name, error = %e, "Migration failed; will retry on next open");
                outcome.failed.push(migration.name.to_string());
            }
        }
    }

    outcome
}

/// `Ok(None)` when already applied
fn apply_one(store: &EncryptedStore, migration: &Migration) -> StorageResult<Option<usize>> {
    store.run_in_transaction(|txn| {
        let mut applied = txn.open_table(SCHEMA_MIGRATIONS)?;
        if applied.get(migration.name)?.is_some() {
            return Ok(None);
        }
        let rows = (migration.apply)(store, txn)?;
        applied.insert(migration.name, Utc::now().timestamp_millis())?;
        Ok(Some(rows))
    })
}

/// Rewrite every snapshot row through `upgrade`; returns rows changed
///
/// Rows that cannot be opened are left in place and skipped.
fn rewrite_snapshots(
    store: &EncryptedStore,
    txn: &WriteTransaction,
    target_version: u8,
    upgrade: fn(StoredSnapshot) -> StoredSnapshot,
) -> StorageResult<usize> {
    let mut table = txn.open_table(HEALTH_SNAPSHOTS)?;

    let mut pending = Vec::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        let row = key.value().to_string();
        match store.unseal::<StoredSnapshot>(names::HEALTH_SNAPSHOTS, &row, value.value()) {
            Ok(stored) if stored.version() < target_version => pending.push((row, stored)),
            Ok(_) => {}
            Err(e) => warn!(date = %row, error = %e, "Skipping unreadable snapshot during migration"),
        }
    }

    let changed = pending.len();
    for (row, stored) in pending {
        let sealed = store.seal(names::HEALTH_SNAPSHOTS, &row, &upgrade(stored))?;
        table.insert(row.as_str(), sealed.as_slice())?;
    }
    Ok(changed)
}

fn add_sleep_detail(store: &EncryptedStore, txn: &WriteTransaction) -> StorageResult<usize> {
    rewrite_snapshots(store, txn, 2, StoredSnapshot::with_sleep_detail)
}

fn add_wellness_metrics(store: &EncryptedStore, txn: &WriteTransaction) -> StorageResult<usize> {
    rewrite_snapshots(store, txn, 3, |stored| {
        StoredSnapshot::V3(stored.into_current())
    })
}
