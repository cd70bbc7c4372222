use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::progression::{
    error::{ProgressionError, internal_error, invalid_state, not_found, persistence_failure},
    ledger::RewardLedger,
    persistence::ProgressionPersistence,
    ports::{CommittedCompletion, CompletionCommit, ProgressionStore},
    types::{Reward, StudyTask, TaskId, User, UserId},
};

/// Users, tasks and the reward ledger as one serializable aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionState {
    pub users: BTreeMap<UserId, User>,
    pub tasks: BTreeMap<TaskId, StudyTask>,
    pub rewards: RewardLedger,
    #[serde(default)]
    next_task_seq: u64,
}

impl ProgressionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user_if_absent(&mut self, user: User) -> User {
        self.users.entry(user.id.clone()).or_insert(user).clone()
    }

    pub fn insert_task(&mut self, mut task: StudyTask) -> Result<StudyTask, ProgressionError> {
        if !self.users.contains_key(&task.user_id) {
            return Err(not_found(format!("user '{}' does not exist", task.user_id)));
        }
        if self.tasks.contains_key(&task.id) {
            return Err(invalid_state(format!("task '{}' already exists", task.id)));
        }

        self.next_task_seq = self
            .next_task_seq
            .checked_add(1)
            .ok_or_else(|| internal_error("task sequence overflow"))?;
        task.created_seq = self.next_task_seq;
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Tasks of one user in insertion order.
    pub fn tasks_for_user(&self, user_id: &str) -> Vec<StudyTask> {
        let mut tasks: Vec<StudyTask> = self
            .tasks
            .values()
            .filter(|task| task.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_seq);
        tasks
    }

    pub fn count_completed(&self, user_id: &str) -> u64 {
        self.tasks
            .values()
            .filter(|task| task.user_id == user_id && task.completed)
            .count() as u64
    }

    pub fn rewards_for_user(&self, user_id: &str) -> Vec<Reward> {
        self.rewards.for_user(user_id).cloned().collect()
    }

    /// Checks every precondition of `commit` before touching anything, then
    /// records the reward, flips the task and updates the user.
    pub fn apply_completion(
        &mut self,
        commit: CompletionCommit,
    ) -> Result<CommittedCompletion, ProgressionError> {
        let task = self
            .tasks
            .get(&commit.task_id)
            .ok_or_else(|| not_found(format!("task '{}' does not exist", commit.task_id)))?;
        if task.user_id != commit.user_id {
            return Err(invalid_state(format!(
                "task '{}' belongs to user '{}', not '{}'",
                commit.task_id, task.user_id, commit.user_id
            )));
        }
        if task.completed {
            return Err(invalid_state(format!(
                "task '{}' is already completed",
                commit.task_id
            )));
        }

        let user = self
            .users
            .get(&commit.user_id)
            .ok_or_else(|| not_found(format!("user '{}' does not exist", commit.user_id)))?;
        if user.level != commit.expected_level || user.money != commit.expected_money {
            return Err(persistence_failure(format!(
                "user '{}' changed concurrently: expected level={} money={}, found level={} money={}",
                user.id, commit.expected_level, commit.expected_money, user.level, user.money
            )));
        }

        let (level_after_reward, money_after_reward) = match &commit.reward {
            Some(reward) => {
                if reward.user_id != commit.user_id || reward.task_id != commit.task_id {
                    return Err(internal_error(
                        "reward does not belong to the completion it is committed with",
                    ));
                }
                if reward.from_level != user.level {
                    return Err(internal_error(format!(
                        "reward starts at level {} but user '{}' holds level {}",
                        reward.from_level, user.id, user.level
                    )));
                }
                let money = user.money.checked_add(reward.amount).ok_or_else(|| {
                    internal_error(format!("money overflow for user '{}'", user.id))
                })?;
                (reward.to_level, money)
            }
            None => (user.level, user.money),
        };
        if commit.new_level != level_after_reward || commit.new_money != money_after_reward {
            return Err(internal_error(format!(
                "commit for user '{}' disagrees with its reward: level {} vs {}, money {} vs {}",
                user.id, commit.new_level, level_after_reward, commit.new_money, money_after_reward
            )));
        }

        let reward = match commit.reward {
            Some(reward) => Some(self.rewards.append(reward)?.clone()),
            None => None,
        };

        let task = self
            .tasks
            .get_mut(&commit.task_id)
            .ok_or_else(|| internal_error("task vanished during completion"))?;
        task.completed = true;
        let task = task.clone();

        let user = self
            .users
            .get_mut(&commit.user_id)
            .ok_or_else(|| internal_error("user vanished during completion"))?;
        user.level = commit.new_level;
        user.money = commit.new_money;
        let user = user.clone();

        Ok(CommittedCompletion { user, task, reward })
    }
}

/// Default store: state in memory, optionally mirrored to a snapshot file.
///
/// Every write runs against a copy of the state which replaces the live state
/// only after it has been persisted.
pub struct InMemoryStore {
    state: Mutex<ProgressionState>,
    persistence: Option<ProgressionPersistence>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_state(ProgressionState::new())
    }

    pub fn with_state(state: ProgressionState) -> Self {
        Self {
            state: Mutex::new(state),
            persistence: None,
        }
    }

    /// Loads the snapshot behind `persistence`, starting empty when none exists.
    pub fn open(persistence: ProgressionPersistence) -> Result<Self, ProgressionError> {
        let state = persistence.load()?.unwrap_or_default();
        Ok(Self {
            state: Mutex::new(state),
            persistence: Some(persistence),
        })
    }

    pub async fn snapshot(&self) -> ProgressionState {
        self.state.lock().await.clone()
    }

    async fn write<T>(
        &self,
        apply: impl FnOnce(&mut ProgressionState) -> Result<T, ProgressionError>,
    ) -> Result<T, ProgressionError> {
        let mut guard = self.state.lock().await;
        let mut staged = guard.clone();
        let output = apply(&mut staged)?;
        if let Some(persistence) = &self.persistence {
            staged = save_blocking(persistence.clone(), staged).await?;
        }
        *guard = staged;
        Ok(output)
    }
}

/// Runs the snapshot write on the blocking pool; the state lock stays held so
/// writes land on disk in commit order.
async fn save_blocking(
    persistence: ProgressionPersistence,
    staged: ProgressionState,
) -> Result<ProgressionState, ProgressionError> {
    tokio::task::spawn_blocking(move || persistence.save(&staged).map(|()| staged))
        .await
        .map_err(|err| internal_error(format!("snapshot writer task failed: {err}")))?
}

#[async_trait]
impl ProgressionStore for InMemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ProgressionError> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn insert_user_if_absent(&self, user: User) -> Result<User, ProgressionError> {
        if let Some(existing) = self.state.lock().await.users.get(&user.id) {
            return Ok(existing.clone());
        }
        self.write(|state| Ok(state.insert_user_if_absent(user)))
            .await
    }

    async fn find_task(&self, task_id: &str) -> Result<Option<StudyTask>, ProgressionError> {
        Ok(self.state.lock().await.tasks.get(task_id).cloned())
    }

    async fn insert_task(&self, task: StudyTask) -> Result<StudyTask, ProgressionError> {
        self.write(|state| state.insert_task(task)).await
    }

    async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<StudyTask>, ProgressionError> {
        Ok(self.state.lock().await.tasks_for_user(user_id))
    }

    async fn count_completed(&self, user_id: &str) -> Result<u64, ProgressionError> {
        Ok(self.state.lock().await.count_completed(user_id))
    }

    async fn rewards_for_user(&self, user_id: &str) -> Result<Vec<Reward>, ProgressionError> {
        Ok(self.state.lock().await.rewards_for_user(user_id))
    }

    async fn commit_completion(
        &self,
        commit: CompletionCommit,
    ) -> Result<CommittedCompletion, ProgressionError> {
        self.write(|state| state.apply_completion(commit)).await
    }
}
