//! Health snapshot repository
//!
//! One row per local day, keyed by `YYYY-MM-DD`. Rows are stored inside a
//! versioned envelope so that fields added later can be filled in by
//! migrations instead of breaking decoding of older rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use vitalis_core::{DayKey, HealthSnapshot, Platform, SleepDetails, WellnessMetrics};

use crate::error::StorageResult;
use crate::tables::{EncryptedStore, HEALTH_SNAPSHOTS, names};

/// Snapshot row as first shipped: totals only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapshotV1 {
    pub date: DayKey,
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub steps: u32,
    pub sleep_minutes: u32,
    pub finalized: bool,
}

/// Adds sleep session detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapshotV2 {
    pub date: DayKey,
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub steps: u32,
    pub sleep_minutes: u32,
    pub finalized: bool,
    pub sleep: Option<SleepDetails>,
}

/// On-disk snapshot envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum StoredSnapshot {
    V1(SnapshotV1),
    V2(SnapshotV2),
    V3(HealthSnapshot),
}

impl StoredSnapshot {
    pub(crate) fn version(&self) -> u8 {
        match self {
            StoredSnapshot::V1(_) => 1,
            StoredSnapshot::V2(_) => 2,
            StoredSnapshot::V3(_) => 3,
        }
    }

    /// Bring a V1 row up to V2; later versions are returned unchanged
    pub(crate) fn with_sleep_detail(self) -> Self {
        match self {
            StoredSnapshot::V1(v1) => StoredSnapshot::V2(SnapshotV2 {
                date: v1.date,
                timestamp: v1.timestamp,
                platform: v1.platform,
                steps: v1.steps,
                sleep_minutes: v1.sleep_minutes,
                finalized: v1.finalized,
                sleep: None,
            }),
            other => other,
        }
    }

    /// Bring any row up to the current layout
    pub(crate) fn into_current(self) -> HealthSnapshot {
        match self.with_sleep_detail() {
            StoredSnapshot::V2(v2) => HealthSnapshot {
                date: v2.date,
                timestamp: v2.timestamp,
                platform: v2.platform,
                steps: v2.steps,
                sleep_minutes: v2.sleep_minutes,
                finalized: v2.finalized,
                sleep: v2.sleep,
                metrics: WellnessMetrics::default(),
            },
            StoredSnapshot::V3(current) => current,
            // with_sleep_detail never yields V1
            StoredSnapshot::V1(v1) => HealthSnapshot {
                date: v1.date,
                timestamp: v1.timestamp,
                platform: v1.platform,
                steps: v1.steps,
                sleep_minutes: v1.sleep_minutes,
                finalized: v1.finalized,
                sleep: None,
                metrics: WellnessMetrics::default(),
            },
        }
    }
}

/// Read and write access to per-day health snapshots
#[derive(Clone)]
pub struct SnapshotRepository {
    store: Arc<EncryptedStore>,
}

impl SnapshotRepository {
    pub fn new(store: Arc<EncryptedStore>) -> Self {
        Self { store }
    }

    fn decode(&self, row: &str, sealed: &[u8]) -> StorageResult<HealthSnapshot> {
        let stored: StoredSnapshot = self.store.unseal(names::HEALTH_SNAPSHOTS, row, sealed)?;
        Ok(stored.into_current())
    }

    /// Insert or replace the snapshot for its day
    #[instrument(skip(self, snapshot), fields(date = %snapshot.date))]
    pub fn upsert(&self, snapshot: &HealthSnapshot) -> StorageResult<()> {
        let row = snapshot.date.as_key();
        let sealed = self.store.seal(
            names::HEALTH_SNAPSHOTS,
            &row,
            &StoredSnapshot::V3(snapshot.clone()),
        )?;

        self.store.run_in_transaction(|txn| {
            let mut table = txn.open_table(HEALTH_SNAPSHOTS)?;
            table.insert(row.as_str(), sealed.as_slice())?;
            Ok(())
        })?;

        debug!(
            steps = snapshot.steps,
            sleep_minutes = snapshot.sleep_minutes,
            finalized = snapshot.finalized,
            "Upserted snapshot"
        );
        Ok(())
    }

    /// Snapshot for one day
    pub fn get_by_date(&self, day: DayKey) -> StorageResult<Option<HealthSnapshot>> {
        let row = day.as_key();
        let read = self.store.begin_read()?;
        let table = read.open_table(HEALTH_SNAPSHOTS)?;
        match table.get(row.as_str())? {
            Some(value) => Ok(Some(self.decode(&row, value.value())?)),
            None => Ok(None),
        }
    }

    /// Snapshot with the greatest date
    pub fn get_latest(&self) -> StorageResult<Option<HealthSnapshot>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(HEALTH_SNAPSHOTS)?;
        match table.last()? {
            Some((key, value)) => Ok(Some(self.decode(key.value(), value.value())?)),
            None => Ok(None),
        }
    }

    /// The most recent `limit` snapshots, oldest first
    ///
    /// Rows that fail to open are skipped with a warning.
    pub fn get_history(&self, limit: usize) -> StorageResult<Vec<HealthSnapshot>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(HEALTH_SNAPSHOTS)?;

        let mut snapshots = Vec::with_capacity(limit);
        for entry in table.iter()?.rev().take(limit) {
            let (key, value) = entry?;
            match self.decode(key.value(), value.value()) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(date = key.value(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        snapshots.reverse();
        Ok(snapshots)
    }

    /// Snapshots with `from <= date <= to`, oldest first
    pub fn get_range(&self, from: DayKey, to: DayKey) -> StorageResult<Vec<HealthSnapshot>> {
        if from > to {
            return Ok(Vec::new());
        }
        let (from_key, to_key) = (from.as_key(), to.as_key());
        let read = self.store.begin_read()?;
        let table = read.open_table(HEALTH_SNAPSHOTS)?;

        let mut snapshots = Vec::new();
        for entry in table.range(from_key.as_str()..=to_key.as_str())? {
            let (key, value) = entry?;
            match self.decode(key.value(), value.value()) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(date = key.value(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(snapshots)
    }

    /// Number of stored days
    pub fn count(&self) -> StorageResult<u64> {
        let read = self.store.begin_read()?;
        let table = read.open_table(HEALTH_SNAPSHOTS)?;
        Ok(table.len()?)
    }
}
