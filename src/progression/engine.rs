use std::{collections::BTreeMap, sync::Arc};

use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::progression::{
    error::{ProgressionError, internal_error, invalid_state, not_found, validation_error},
    ledger::RewardLedger,
    level_policy,
    locks::UserLocks,
    ports::{CompletionCommit, ProgressionStore},
    store::InMemoryStore,
    tiers::WealthTierTable,
    types::{CompletionOutcome, NewTask, Reward, RewardGrant, StudyTask, User, UserSummary},
};

/// Entry point for every progression operation.
///
/// Operations that read and then write a user's state hold that user's lock for
/// their whole duration, so completions of one user are applied one at a time.
pub struct ProgressionEngine {
    store: Arc<dyn ProgressionStore>,
    locks: UserLocks,
    display_names: BTreeMap<String, String>,
    tiers: WealthTierTable,
}

impl ProgressionEngine {
    pub fn new(store: Arc<dyn ProgressionStore>) -> Self {
        Self {
            store,
            locks: UserLocks::new(),
            display_names: BTreeMap::new(),
            tiers: WealthTierTable::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn with_display_names(mut self, display_names: BTreeMap<String, String>) -> Self {
        self.display_names = display_names;
        self
    }

    pub fn with_tiers(mut self, tiers: WealthTierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn tiers(&self) -> &WealthTierTable {
        &self.tiers
    }

    #[tracing::instrument(name = "get_or_create_user", target = "progression", skip(self))]
    pub async fn get_or_create_user(&self, user_id: &str) -> Result<User, ProgressionError> {
        let user_id = normalize_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        self.ensure_user(user_id).await
    }

    /// Users are created with defaults on first access.
    pub async fn get_user(&self, user_id: &str) -> Result<User, ProgressionError> {
        self.get_or_create_user(user_id).await
    }

    #[tracing::instrument(
        name = "create_task",
        target = "progression",
        skip(self, request),
        fields(user_id = %request.user_id)
    )]
    pub async fn create_task(&self, request: NewTask) -> Result<StudyTask, ProgressionError> {
        request
            .validate()
            .map_err(|err| validation_error(format!("invalid task: {err}")))?;
        let user_id = normalize_user_id(&request.user_id)?;

        let _guard = self.locks.acquire(user_id).await;
        self.ensure_user(user_id).await?;

        let description = request
            .description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let task = self
            .store
            .insert_task(StudyTask {
                id: Uuid::now_v7().to_string(),
                user_id: user_id.to_string(),
                title: request.title.trim().to_string(),
                description,
                duration_minutes: request.duration_minutes,
                completed: false,
                created_at: OffsetDateTime::now_utc(),
                created_seq: 0,
            })
            .await?;

        tracing::info!(
            target: "progression",
            task_id = %task.id,
            user_id = %task.user_id,
            duration_minutes = task.duration_minutes,
            "task_created"
        );
        Ok(task)
    }

    /// Incomplete tasks first, then completed ones; newest first in each group.
    pub async fn list_tasks(&self, user_id: &str) -> Result<Vec<StudyTask>, ProgressionError> {
        let user_id = normalize_user_id(user_id)?;
        let mut tasks = self.store.tasks_for_user(user_id).await?;
        tasks.sort_by(|left, right| {
            left.completed
                .cmp(&right.completed)
                .then_with(|| right.created_at.cmp(&left.created_at))
                .then_with(|| right.created_seq.cmp(&left.created_seq))
        });
        Ok(tasks)
    }

    #[tracing::instrument(name = "complete_task", target = "progression", skip(self))]
    pub async fn complete_task(&self, task_id: &str) -> Result<CompletionOutcome, ProgressionError> {
        let owner = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| not_found(format!("task '{}' does not exist", task_id)))?
            .user_id;

        let _guard = self.locks.acquire(&owner).await;

        // Re-read under the lock: a concurrent request may have completed it.
        let task = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| not_found(format!("task '{}' does not exist", task_id)))?;
        if task.completed {
            return Err(invalid_state(format!(
                "task '{}' is already completed",
                task_id
            )));
        }
        let user = self.store.find_user(&task.user_id).await?.ok_or_else(|| {
            not_found(format!(
                "user '{}' owning task '{}' does not exist",
                task.user_id, task_id
            ))
        })?;

        // The task is still open here, so the count after flipping it is one more.
        let completed_before = self.store.count_completed(&user.id).await?;
        let completed_after = completed_before
            .checked_add(1)
            .ok_or_else(|| internal_error("completed task count overflow"))?;
        let decision = level_policy::evaluate(completed_after, user.level);

        let reward = if decision.leveled_up {
            let reward = RewardLedger::draft(
                &user.id,
                &task.id,
                user.level,
                OffsetDateTime::now_utc(),
            )?;
            if reward.to_level != decision.new_level || reward.amount != decision.reward_amount {
                return Err(internal_error(format!(
                    "level decision for user '{}' disagrees with the reward ledger",
                    user.id
                )));
            }
            Some(reward)
        } else {
            None
        };
        let new_money = user
            .money
            .checked_add(decision.reward_amount)
            .ok_or_else(|| internal_error(format!("money overflow for user '{}'", user.id)))?;

        let committed = self
            .store
            .commit_completion(CompletionCommit {
                task_id: task.id.clone(),
                user_id: user.id.clone(),
                expected_level: user.level,
                expected_money: user.money,
                new_level: decision.new_level,
                new_money,
                reward,
            })
            .await?;

        tracing::info!(
            target: "progression",
            task_id = %committed.task.id,
            user_id = %committed.user.id,
            completed_count = completed_after,
            level = committed.user.level,
            money = committed.user.money,
            "task_completed"
        );
        if let Some(reward) = &committed.reward {
            tracing::info!(
                target: "progression",
                user_id = %reward.user_id,
                from_level = reward.from_level,
                to_level = reward.to_level,
                amount = reward.amount,
                reward_id = %reward.id,
                "level_up"
            );
        }

        Ok(CompletionOutcome {
            reward: committed.reward.as_ref().map(RewardGrant::from),
            user: committed.user,
            task: committed.task,
        })
    }

    /// Reward ledger entries of one user, oldest first.
    pub async fn rewards(&self, user_id: &str) -> Result<Vec<Reward>, ProgressionError> {
        let user_id = normalize_user_id(user_id)?;
        let mut rewards = self.store.rewards_for_user(user_id).await?;
        rewards.sort_by_key(|reward| reward.seq_no);
        Ok(rewards)
    }

    pub async fn user_summary(&self, user_id: &str) -> Result<UserSummary, ProgressionError> {
        let user = self.get_or_create_user(user_id).await?;
        let tasks = self.store.tasks_for_user(&user.id).await?;
        let rewards = self.store.rewards_for_user(&user.id).await?;

        Ok(UserSummary {
            tier: self.tiers.classify(user.money).clone(),
            next_tier: self.tiers.next_tier(user.money).cloned(),
            completed_tasks: tasks.iter().filter(|task| task.completed).count() as u64,
            total_tasks: tasks.len() as u64,
            reward_count: rewards.len() as u64,
            user,
        })
    }

    async fn ensure_user(&self, user_id: &str) -> Result<User, ProgressionError> {
        if let Some(user) = self.store.find_user(user_id).await? {
            return Ok(user);
        }

        let name = self
            .display_names
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string());
        let user = self
            .store
            .insert_user_if_absent(User::new(user_id, name, OffsetDateTime::now_utc()))
            .await?;
        tracing::info!(target: "progression", user_id = %user.id, name = %user.name, "user_created");
        Ok(user)
    }
}

fn normalize_user_id(user_id: &str) -> Result<&str, ProgressionError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(validation_error("user id must not be blank"));
    }
    if trimmed.len() > 128 {
        return Err(validation_error("user id must be at most 128 bytes"));
    }
    Ok(trimmed)
}
