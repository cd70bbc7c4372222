pub mod engine;
pub mod error;
pub mod invariants;
pub mod ledger;
pub mod level_policy;
pub mod locks;
pub mod persistence;
pub mod ports;
pub mod store;
pub mod tiers;
pub mod types;

pub use engine::ProgressionEngine;
pub use error::{ProgressionError, ProgressionErrorKind};
pub use invariants::assert_ledger_consistency;
pub use ledger::RewardLedger;
pub use level_policy::evaluate;
pub use locks::UserLocks;
pub use persistence::ProgressionPersistence;
pub use ports::{CommittedCompletion, CompletionCommit, ProgressionStore};
pub use store::{InMemoryStore, ProgressionState};
pub use tiers::{WealthTier, WealthTierTable, classify, is_current_tier};
pub use types::{
    CompletionOutcome, INITIAL_LEVEL, LevelDecision, NewTask, REWARD_PER_LEVEL, Reward,
    RewardGrant, RewardId, StudyTask, TaskId, User, UserId, UserSummary,
};
