use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::{Validate, ValidationError};

use crate::progression::tiers::WealthTier;

pub type UserId = String;
pub type TaskId = String;
pub type RewardId = String;

/// Coins paid per level held before a level-up.
pub const REWARD_PER_LEVEL: u64 = 10;
pub const INITIAL_LEVEL: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub level: u32,
    pub money: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level: INITIAL_LEVEL,
            money: 0,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyTask {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Store insertion order; breaks ties between equal `created_at` values.
    #[serde(default)]
    pub created_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub id: RewardId,
    pub seq_no: u64,
    pub user_id: UserId,
    /// Completion that triggered the level-up.
    pub task_id: TaskId,
    pub from_level: u32,
    pub to_level: u32,
    pub amount: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Request to add a study task, checked at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewTask {
    /// Checked by the engine after trimming.
    pub user_id: UserId,
    #[validate(custom(function = "valid_title"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 1))]
    pub duration_minutes: u32,
}

pub const MAX_TITLE_CHARS: usize = 200;

fn valid_title(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("blank").with_message("must not be blank".into()));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::new("length")
            .with_message(format!("must be at most {MAX_TITLE_CHARS} characters").into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDecision {
    pub leveled_up: bool,
    pub new_level: u32,
    pub reward_amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardGrant {
    pub amount: u64,
    pub from_level: u32,
    pub to_level: u32,
}

impl From<&Reward> for RewardGrant {
    fn from(reward: &Reward) -> Self {
        Self {
            amount: reward.amount,
            from_level: reward.from_level,
            to_level: reward.to_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub user: User,
    pub task: StudyTask,
    #[serde(default)]
    pub reward: Option<RewardGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user: User,
    pub tier: WealthTier,
    #[serde(default)]
    pub next_tier: Option<WealthTier>,
    pub completed_tasks: u64,
    pub total_tasks: u64,
    pub reward_count: u64,
}
