//! Quest ledger domain types and streak rules
//!
//! Persistence and the atomic completion transaction live in
//! `vitalis-storage`; the rules that decide streak counts, bonuses, and
//! badge awards are pure and live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::DayKey;
use crate::error::{CoreError, CoreResult};

/// Streak length that earns the large bonus
pub const LONG_STREAK_DAYS: u32 = 7;

/// Streak length that earns the small bonus
pub const SHORT_STREAK_DAYS: u32 = 3;

/// Bonus at [`LONG_STREAK_DAYS`]
pub const LONG_STREAK_BONUS: u32 = 5;

/// Bonus at [`SHORT_STREAK_DAYS`]
pub const SHORT_STREAK_BONUS: u32 = 2;

/// Accumulated progress for a quest on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestProgress {
    pub quest_id: String,
    pub date: DayKey,
    pub value: f64,
    pub done: bool,
    pub updated_at: DateTime<Utc>,
}

/// Consecutive completed days for a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub quest_id: String,
    pub count: u32,
    pub last_date: Option<DayKey>,
}

impl Streak {
    /// A quest that was never completed
    pub fn empty(quest_id: impl Into<String>) -> Self {
        Self {
            quest_id: quest_id.into(),
            count: 0,
            last_date: None,
        }
    }

    /// Count after completing the quest on `today`
    ///
    /// Completing twice on the same day keeps the count; completing the
    /// day after the last completion extends it; anything else restarts
    /// at one.
    pub fn next_count(&self, today: DayKey) -> u32 {
        match self.last_date {
            Some(last) if last == today => self.count,
            Some(last) if last == today.pred() => self.count.saturating_add(1),
            _ => 1,
        }
    }

    /// The streak as it stands on `today`: zero once a day has been missed
    pub fn current_as_of(&self, today: DayKey) -> u32 {
        match self.last_date {
            Some(last) if last == today || last == today.pred() => self.count,
            _ => 0,
        }
    }
}

/// Extra points awarded for a streak of `count` days
pub fn streak_bonus(count: u32) -> u32 {
    if count >= LONG_STREAK_DAYS {
        LONG_STREAK_BONUS
    } else if count >= SHORT_STREAK_DAYS {
        SHORT_STREAK_BONUS
    } else {
        0
    }
}

/// Append-only history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedLog {
    pub id: u64,
    pub quest_id: String,
    pub date: DayKey,
    pub title: String,
    pub reward_points: u32,
    pub reward_tag: String,
    pub completed_at: DateTime<Utc>,
    pub streak_count: u32,
    pub note: Option<String>,
}

/// A badge, awarded at most once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub awarded_at: DateTime<Utc>,
}

/// Award `badge_id` when `quest_id` reaches exactly `threshold` days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeRule {
    pub badge_id: String,
    pub quest_id: String,
    pub threshold: u32,
}

impl BadgeRule {
    pub fn new(badge_id: impl Into<String>, quest_id: impl Into<String>, threshold: u32) -> Self {
        Self {
            badge_id: badge_id.into(),
            quest_id: quest_id.into(),
            threshold,
        }
    }
}

/// The set of badge rules known to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeCatalog {
    rules: Vec<BadgeRule>,
}

impl BadgeCatalog {
    /// Catalog with no rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Catalog from explicit rules
    pub fn new(rules: Vec<BadgeRule>) -> Self {
        Self { rules }
    }

    /// Add a rule
    pub fn with_rule(mut self, rule: BadgeRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rules triggered when `quest_id` reaches `count`
    pub fn rules_for<'a>(&'a self, quest_id: &'a str, count: u32) -> impl Iterator<Item = &'a BadgeRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.quest_id == quest_id && r.threshold == count)
    }

    pub fn rules(&self) -> &[BadgeRule] {
        &self.rules
    }
}

impl Default for BadgeCatalog {
    fn default() -> Self {
        Self::new(vec![
            BadgeRule::new("streak7_drink", "drink_2l", 7),
            BadgeRule::new("streak3_walk", "walk_10k", 3),
            BadgeRule::new("streak7_walk", "walk_10k", 7),
            BadgeRule::new("streak7_sleep", "sleep_8h", 7),
            BadgeRule::new("streak7_mindful", "mindful_10m", 7),
        ])
    }
}

/// A request to complete a quest for today
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestCompletion {
    pub quest_id: String,
    pub title: String,
    pub target_value: f64,
    pub reward_points: u32,
    pub reward_tag: String,
    pub note: Option<String>,
}

impl QuestCompletion {
    pub fn new(
        quest_id: impl Into<String>,
        title: impl Into<String>,
        target_value: f64,
        reward_points: u32,
        reward_tag: impl Into<String>,
    ) -> Self {
        Self {
            quest_id: quest_id.into(),
            title: title.into(),
            target_value,
            reward_points,
            reward_tag: reward_tag.into(),
            note: None,
        }
    }

    /// Attach a free-form note to the history entry
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Reject requests that cannot be stored
    pub fn validate(&self) -> CoreResult<()> {
        if self.quest_id.trim().is_empty() {
            return Err(CoreError::InvalidQuest("quest id is empty".to_string()));
        }
        if self.reward_tag.trim().is_empty() {
            return Err(CoreError::InvalidQuest("reward tag is empty".to_string()));
        }
        if !self.target_value.is_finite() {
            return Err(CoreError::InvalidQuest(format!(
                "target value {} is not finite",
                self.target_value
            )));
        }
        Ok(())
    }
}

/// What a completion changed
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub streak: Streak,
    /// Base reward plus streak bonus
    pub total_reward: u32,
    /// Tag total after this completion
    pub tag_points: u64,
    /// Badges newly awarded by this completion
    pub badges_awarded: Vec<String>,
    /// History entries appended, in insertion order
    pub log_entries: Vec<CompletedLog>,
}
