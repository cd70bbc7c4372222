use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::progression::{
    error::{ProgressionError, internal_error, invalid_state},
    types::{REWARD_PER_LEVEL, Reward, TaskId, UserId},
};

/// Append-only record of every level-up payout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardLedger {
    next_sequence: u64,
    entries: Vec<Reward>,
}

impl RewardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Reward] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn for_user<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a Reward> + 'a {
        self.entries
            .iter()
            .filter(move |reward| reward.user_id == user_id)
    }

    /// Builds the entry for a level-up of `user_id` from `from_level` without
    /// appending it. Sequence numbers are assigned by [`RewardLedger::append`].
    pub fn draft(
        user_id: &UserId,
        task_id: &TaskId,
        from_level: u32,
        created_at: OffsetDateTime,
    ) -> Result<Reward, ProgressionError> {
        let to_level = from_level
            .checked_add(1)
            .ok_or_else(|| internal_error("level overflow while drafting reward"))?;
        Ok(Reward {
            id: Uuid::now_v7().to_string(),
            seq_no: 0,
            user_id: user_id.clone(),
            task_id: task_id.clone(),
            from_level,
            to_level,
            amount: u64::from(from_level) * REWARD_PER_LEVEL,
            created_at,
        })
    }

    pub fn append(&mut self, mut reward: Reward) -> Result<&Reward, ProgressionError> {
        if reward.from_level == 0 || reward.from_level.checked_add(1) != Some(reward.to_level) {
            return Err(invalid_state(format!(
                "reward must advance exactly one level, got {} -> {}",
                reward.from_level, reward.to_level
            )));
        }
        if reward.amount != u64::from(reward.from_level) * REWARD_PER_LEVEL {
            return Err(invalid_state(format!(
                "reward amount {} does not match level {}",
                reward.amount, reward.from_level
            )));
        }
        if self.entries.iter().any(|entry| entry.id == reward.id) {
            return Err(invalid_state(format!(
                "reward '{}' is already recorded",
                reward.id
            )));
        }

        self.next_sequence = self
            .next_sequence
            .checked_add(1)
            .ok_or_else(|| internal_error("reward ledger sequence overflow"))?;
        reward.seq_no = self.next_sequence;
        self.entries.push(reward);
        Ok(&self.entries[self.entries.len() - 1])
    }
}
