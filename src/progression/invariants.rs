use std::collections::BTreeMap;

use crate::progression::{
    error::{ProgressionError, internal_error},
    store::ProgressionState,
    types::{INITIAL_LEVEL, REWARD_PER_LEVEL, Reward},
};

/// Cross-checks users, tasks and the reward ledger of `state`.
pub fn assert_ledger_consistency(state: &ProgressionState) -> Result<(), ProgressionError> {
    for (task_id, task) in &state.tasks {
        if task.id != *task_id {
            return Err(internal_error(format!(
                "task keyed '{}' carries id '{}'",
                task_id, task.id
            )));
        }
        if !state.users.contains_key(&task.user_id) {
            return Err(internal_error(format!(
                "task '{}' references unknown user '{}'",
                task.id, task.user_id
            )));
        }
        if task.title.trim().is_empty() || task.duration_minutes == 0 {
            return Err(internal_error(format!(
                "task '{}' has a blank title or zero duration",
                task.id
            )));
        }
    }

    let mut rewards_by_user: BTreeMap<&str, Vec<&Reward>> = BTreeMap::new();
    let mut last_seq_no = 0;
    for reward in state.rewards.entries() {
        if reward.seq_no <= last_seq_no {
            return Err(internal_error(format!(
                "reward '{}' breaks ledger sequence order at {}",
                reward.id, reward.seq_no
            )));
        }
        last_seq_no = reward.seq_no;
        rewards_by_user
            .entry(reward.user_id.as_str())
            .or_default()
            .push(reward);
    }
    if last_seq_no > state.rewards.next_sequence() {
        return Err(internal_error(
            "reward ledger sequence counter is behind its entries",
        ));
    }

    for (user_id, user) in &state.users {
        if user.level < INITIAL_LEVEL {
            return Err(internal_error(format!(
                "user '{}' holds invalid level {}",
                user_id, user.level
            )));
        }

        let rewards = rewards_by_user.remove(user_id.as_str()).unwrap_or_default();
        let mut expected_from = INITIAL_LEVEL;
        let mut paid: u64 = 0;
        for reward in &rewards {
            if reward.from_level != expected_from
                || reward.to_level != expected_from + 1
                || reward.amount != u64::from(reward.from_level) * REWARD_PER_LEVEL
            {
                return Err(internal_error(format!(
                    "reward '{}' for user '{}' is out of chain: {} -> {} paying {}",
                    reward.id, user_id, reward.from_level, reward.to_level, reward.amount
                )));
            }
            let trigger = state.tasks.get(&reward.task_id);
            if !trigger.is_some_and(|task| task.completed && task.user_id == *user_id) {
                return Err(internal_error(format!(
                    "reward '{}' is not backed by a completed task of user '{}'",
                    reward.id, user_id
                )));
            }
            expected_from += 1;
            paid = paid.checked_add(reward.amount).ok_or_else(|| {
                internal_error(format!("reward total overflow for user '{}'", user_id))
            })?;
        }

        if user.level != expected_from {
            return Err(internal_error(format!(
                "user '{}' holds level {} but the ledger implies {}",
                user_id, user.level, expected_from
            )));
        }
        if user.money != paid {
            return Err(internal_error(format!(
                "user '{}' holds {} but the ledger paid {}",
                user_id, user.money, paid
            )));
        }
        if rewards.len() as u64 > state.count_completed(user_id) {
            return Err(internal_error(format!(
                "user '{}' has more rewards than completed tasks",
                user_id
            )));
        }
    }

    if let Some((user_id, _)) = rewards_by_user.into_iter().next() {
        return Err(internal_error(format!(
            "rewards reference unknown user '{}'",
            user_id
        )));
    }

    Ok(())
}
