//! Atomic quest completion
//!
//! One completion touches progress, streak, badges, history, and points.
//! All of it happens in a single write transaction so that a reader never
//! sees a streak that disagrees with the history or a reward without its
//! log entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, Table, WriteTransaction};
use tracing::{info, instrument};
use vitalis_core::{
    Badge, BadgeCatalog, CompletedLog, CompletionOutcome, DayKey, QuestCompletion, QuestProgress,
    Streak, streak_bonus,
};

use crate::error::StorageResult;
use crate::quest::progress_row;
use crate::tables::{
    BADGES, EncryptedStore, QUEST_HISTORY, QUEST_POINTS, QUEST_PROGRESS, QUEST_STREAKS, names,
};

/// The single writer for quest state
#[derive(Clone)]
pub struct QuestLedger {
    store: Arc<EncryptedStore>,
    catalog: Arc<BadgeCatalog>,
}

impl QuestLedger {
    pub fn new(store: Arc<EncryptedStore>, catalog: BadgeCatalog) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &BadgeCatalog {
        &self.catalog
    }

    /// Complete `request.quest_id` for `today`
    ///
    /// Either every table is updated or, on any error, none is.
    #[instrument(skip(self, request), fields(quest_id = %request.quest_id, day = %today))]
    pub fn complete_quest(
        &self,
        request: &QuestCompletion,
        today: DayKey,
        now: DateTime<Utc>,
    ) -> StorageResult<CompletionOutcome> {
        request.validate()?;

        let outcome = self
            .store
            .run_in_transaction(|txn| self.apply(txn, request, today, now))?;

        for badge in &outcome.badges_awarded {
            info!(badge = %badge, "Badge unlocked");
        }
        info!(
            streak = outcome.streak.count,
            reward = outcome.total_reward,
            tag = %request.reward_tag,
            "Quest completed"
        );
        Ok(outcome)
    }

    fn apply(
        &self,
        txn: &WriteTransaction,
        request: &QuestCompletion,
        today: DayKey,
        now: DateTime<Utc>,
    ) -> StorageResult<CompletionOutcome> {
        let store = &self.store;
        let quest_id = request.quest_id.as_str();
        let date = today.as_key();

        let mut progress = txn.open_table(QUEST_PROGRESS)?;
        let mut streaks = txn.open_table(QUEST_STREAKS)?;
        let mut badges = txn.open_table(BADGES)?;
        let mut history = txn.open_table(QUEST_HISTORY)?;
        let mut points = txn.open_table(QUEST_POINTS)?;

        // Progress for today
        let row = QuestProgress {
            quest_id: quest_id.to_string(),
            date: today,
            value: request.target_value,
            done: true,
            updated_at: now,
        };
        let sealed = store.seal(names::QUEST_PROGRESS, &progress_row(quest_id, &date), &row)?;
        progress.insert((quest_id, date.as_str()), sealed.as_slice())?;

        // Streak
        let previous = match streaks.get(quest_id)? {
            Some(value) => store.unseal(names::QUEST_STREAKS, quest_id, value.value())?,
            None => Streak::empty(quest_id),
        };
        let streak = Streak {
            quest_id: quest_id.to_string(),
            count: previous.next_count(today),
            last_date: Some(today),
        };
        let sealed = store.seal(names::QUEST_STREAKS, quest_id, &streak)?;
        streaks.insert(quest_id, sealed.as_slice())?;

        let mut log_entries = Vec::new();
        let mut badges_awarded = Vec::new();

        // Badges crossing their threshold, each awarded once
        for rule in self.catalog.rules_for(quest_id, streak.count) {
            if badges.get(rule.badge_id.as_str())?.is_some() {
                continue;
            }
            let badge = Badge {
                id: rule.badge_id.clone(),
                awarded_at: now,
            };
            let sealed = store.seal(names::BADGES, &badge.id, &badge)?;
            badges.insert(badge.id.as_str(), sealed.as_slice())?;

            let entry = CompletedLog {
                id: next_history_id(&history)?,
                quest_id: quest_id.to_string(),
                date: today,
                title: format!("Badge unlocked: {}", badge.id),
                reward_points: 0,
                reward_tag: request.reward_tag.clone(),
                completed_at: now,
                streak_count: streak.count,
                note: None,
            };
            append_history(store, &mut history, &entry)?;
            log_entries.push(entry);
            badges_awarded.push(badge.id);
        }

        // History entry for the completion itself
        let total_reward = request
            .reward_points
            .saturating_add(streak_bonus(streak.count));
        let entry = CompletedLog {
            id: next_history_id(&history)?,
            quest_id: quest_id.to_string(),
            date: today,
            title: request.title.clone(),
            reward_points: total_reward,
            reward_tag: request.reward_tag.clone(),
            completed_at: now,
            streak_count: streak.count,
            note: request.note.clone(),
        };
        append_history(store, &mut history, &entry)?;
        log_entries.push(entry);

        // Points
        let tag = request.reward_tag.as_str();
        let balance: u64 = match points.get(tag)? {
            Some(value) => store.unseal(names::QUEST_POINTS, tag, value.value())?,
            None => 0,
        };
        let tag_points = balance.saturating_add(u64::from(total_reward));
        let sealed = store.seal(names::QUEST_POINTS, tag, &tag_points)?;
        points.insert(tag, sealed.as_slice())?;

        Ok(CompletionOutcome {
            streak,
            total_reward,
            tag_points,
            badges_awarded,
            log_entries,
        })
    }
}

fn next_history_id(history: &Table<'_, u64, &'static [u8]>) -> StorageResult<u64> {
    Ok(history.last()?.map(|(key, _)| key.value() + 1).unwrap_or(1))
}

fn append_history(
    store: &EncryptedStore,
    history: &mut Table<'_, u64, &'static [u8]>,
    entry: &CompletedLog,
) -> StorageResult<()> {
    let sealed = store.seal(names::QUEST_HISTORY, &entry.id.to_string(), entry)?;
    history.insert(entry.id, sealed.as_slice())?;
    Ok(())
}
