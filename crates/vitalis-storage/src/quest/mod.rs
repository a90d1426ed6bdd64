//! Quest progress, streaks, points, history, and badges
//!
//! Reads go through [`QuestRepository`]; the only writer is
//! [`QuestLedger::complete_quest`], which updates every table in one
//! transaction.

mod ledger;

pub use ledger::QuestLedger;

use std::collections::BTreeMap;
use std::sync::Arc;

use redb::ReadableTable;
use tracing::warn;
use vitalis_core::{Badge, CompletedLog, DayKey, QuestProgress, Streak};

use crate::error::StorageResult;
use crate::tables::{
    BADGES, EncryptedStore, QUEST_HISTORY, QUEST_POINTS, QUEST_PROGRESS, QUEST_STREAKS, names,
};

/// Row key used as associated data for a progress row
pub(crate) fn progress_row(quest_id: &str, date: &str) -> String {
    format!("{quest_id}/{date}")
}

/// Read-only access to quest state
#[derive(Clone)]
pub struct QuestRepository {
    store: Arc<EncryptedStore>,
}

impl QuestRepository {
    pub fn new(store: Arc<EncryptedStore>) -> Self {
        Self { store }
    }

    /// Progress for a quest on one day
    pub fn progress(&self, quest_id: &str, day: DayKey) -> StorageResult<Option<QuestProgress>> {
        let date = day.as_key();
        let read = self.store.begin_read()?;
        let table = read.open_table(QUEST_PROGRESS)?;
        match table.get((quest_id, date.as_str()))? {
            Some(value) => Ok(Some(self.store.unseal(
                names::QUEST_PROGRESS,
                &progress_row(quest_id, &date),
                value.value(),
            )?)),
            None => Ok(None),
        }
    }

    /// Streak for one quest, if it was ever completed
    pub fn streak(&self, quest_id: &str) -> StorageResult<Option<Streak>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(QUEST_STREAKS)?;
        match table.get(quest_id)? {
            Some(value) => Ok(Some(self.store.unseal(
                names::QUEST_STREAKS,
                quest_id,
                value.value(),
            )?)),
            None => Ok(None),
        }
    }

    /// All streaks, ordered by quest id
    pub fn streaks(&self) -> StorageResult<Vec<Streak>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(QUEST_STREAKS)?;

        let mut streaks = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match self
                .store
                .unseal::<Streak>(names::QUEST_STREAKS, key.value(), value.value())
            {
                Ok(streak) => streaks.push(streak),
                Err(e) => warn!(quest_id = key.value(), error = %e, "Skipping unreadable streak"),
            }
        }
        Ok(streaks)
    }

    /// Point balance for one tag; zero if never awarded
    pub fn points_for(&self, tag: &str) -> StorageResult<u64> {
        let read = self.store.begin_read()?;
        let table = read.open_table(QUEST_POINTS)?;
        match table.get(tag)? {
            Some(value) => self.store.unseal(names::QUEST_POINTS, tag, value.value()),
            None => Ok(0),
        }
    }

    /// All point balances by tag
    pub fn points(&self) -> StorageResult<BTreeMap<String, u64>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(QUEST_POINTS)?;

        let mut points = BTreeMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match self
                .store
                .unseal::<u64>(names::QUEST_POINTS, key.value(), value.value())
            {
                Ok(total) => {
                    points.insert(key.value().to_string(), total);
                }
                Err(e) => warn!(tag = key.value(), error = %e, "Skipping unreadable point balance"),
            }
        }
        Ok(points)
    }

    /// The most recent `limit` history entries, newest first
    pub fn history_log(&self, limit: usize) -> StorageResult<Vec<CompletedLog>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(QUEST_HISTORY)?;

        let mut entries = Vec::with_capacity(limit.min(64));
        for entry in table.iter()?.rev().take(limit) {
            let (key, value) = entry?;
            let id = key.value();
            match self
                .store
                .unseal::<CompletedLog>(names::QUEST_HISTORY, &id.to_string(), value.value())
            {
                Ok(log) => entries.push(log),
                Err(e) => warn!(id, error = %e, "Skipping unreadable history entry"),
            }
        }
        Ok(entries)
    }

    /// Every badge awarded so far, ordered by id
    pub fn badges(&self) -> StorageResult<Vec<Badge>> {
        let read = self.store.begin_read()?;
        let table = read.open_table(BADGES)?;

        let mut badges = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match self
                .store
                .unseal::<Badge>(names::BADGES, key.value(), value.value())
            {
                Ok(badge) => badges.push(badge),
                Err(e) => warn!(badge_id = key.value(), error = %e, "Skipping unreadable badge"),
            }
        }
        Ok(badges)
    }
}
