use async_trait::async_trait;

use crate::progression::{
    error::ProgressionError,
    types::{Reward, StudyTask, TaskId, User, UserId},
};

/// Everything one completion writes. A store applies all of it or none of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCommit {
    pub task_id: TaskId,
    pub user_id: UserId,
    /// Level and money the decision was computed from; the store refuses the
    /// commit when the stored user no longer matches them.
    pub expected_level: u32,
    pub expected_money: u64,
    pub new_level: u32,
    pub new_money: u64,
    pub reward: Option<Reward>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedCompletion {
    pub user: User,
    pub task: StudyTask,
    pub reward: Option<Reward>,
}

/// Task store, user store and reward ledger behind one persistence seam.
#[async_trait]
pub trait ProgressionStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ProgressionError>;

    /// Inserts `user` unless a user with the same id exists; returns the stored one.
    async fn insert_user_if_absent(&self, user: User) -> Result<User, ProgressionError>;

    async fn find_task(&self, task_id: &str) -> Result<Option<StudyTask>, ProgressionError>;

    /// Stores a new task and returns it with its insertion sequence assigned.
    async fn insert_task(&self, task: StudyTask) -> Result<StudyTask, ProgressionError>;

    async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<StudyTask>, ProgressionError>;

    async fn count_completed(&self, user_id: &str) -> Result<u64, ProgressionError>;

    async fn rewards_for_user(&self, user_id: &str) -> Result<Vec<Reward>, ProgressionError>;

    async fn commit_completion(
        &self,
        commit: CompletionCommit,
    ) -> Result<CommittedCompletion, ProgressionError>;
}
