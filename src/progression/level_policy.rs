use crate::progression::types::{LevelDecision, REWARD_PER_LEVEL};

/// Decides whether a completion levels the user up.
///
/// `completed_count` must already include the completion being evaluated and
/// `current_level` is the level held before it. A level-up happens when the count
/// is positive and divisible by the current level; it raises the level by one and
/// pays `current_level * 10`. A level of 0 never triggers.
pub fn evaluate(completed_count: u64, current_level: u32) -> LevelDecision {
    let divides = completed_count
        .checked_rem(u64::from(current_level))
        .is_some_and(|remainder| remainder == 0);

    if completed_count > 0 && divides {
        LevelDecision {
            leveled_up: true,
            new_level: current_level.saturating_add(1),
            reward_amount: u64::from(current_level) * REWARD_PER_LEVEL,
        }
    } else {
        LevelDecision {
            leveled_up: false,
            new_level: current_level,
            reward_amount: 0,
        }
    }
}
