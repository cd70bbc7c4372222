use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use studyquest::progression::{
    CommittedCompletion, CompletionCommit, InMemoryStore, ProgressionEngine, ProgressionError,
    ProgressionErrorKind, ProgressionStore, Reward, RewardGrant, StudyTask, User,
    assert_ledger_consistency, error::persistence_failure,
};

use super::{new_task, seeded_state};

#[tokio::test]
async fn given_new_user_when_first_task_completed_then_level_two_with_ten_coins() {
    let store = Arc::new(InMemoryStore::new());
    let engine = ProgressionEngine::new(store.clone());

    let task = engine
        .create_task(new_task("user-a", "Read chapter 1", 30))
        .await
        .expect("task should be created");
    assert!(!task.completed);

    let outcome = engine
        .complete_task(&task.id)
        .await
        .expect("completion should succeed");

    assert!(outcome.task.completed);
    assert_eq!(outcome.user.level, 2);
    assert_eq!(outcome.user.money, 10);
    assert_eq!(
        outcome.reward,
        Some(RewardGrant {
            amount: 10,
            from_level: 1,
            to_level: 2,
        })
    );

    let rewards = engine.rewards("user-a").await.expect("rewards should list");
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].task_id, task.id);
    assert_eq!(rewards[0].amount, 10);
    assert_ledger_consistency(&store.snapshot().await).expect("state should stay consistent");
}

#[tokio::test]
async fn given_level_two_with_two_completed_when_third_completed_then_no_level_up() {
    let (state, open) = seeded_state("user-a", 2, 2, 1);
    let engine = ProgressionEngine::new(Arc::new(InMemoryStore::with_state(state)));

    let outcome = engine
        .complete_task(&open[0])
        .await
        .expect("completion should succeed");

    assert_eq!(outcome.reward, None);
    assert_eq!(outcome.user.level, 2);
    assert_eq!(outcome.user.money, 10);
}

#[tokio::test]
async fn given_level_two_with_three_completed_when_fourth_completed_then_level_three_and_twenty_coins()
 {
    let (state, open) = seeded_state("user-a", 2, 3, 2);
    let engine = ProgressionEngine::new(Arc::new(InMemoryStore::with_state(state)));

    let fourth = engine
        .complete_task(&open[0])
        .await
        .expect("fourth completion should succeed");
    assert_eq!(fourth.user.level, 3);
    assert_eq!(fourth.user.money, 30);
    assert_eq!(fourth.reward.map(|reward| reward.amount), Some(20));

    let fifth = engine
        .complete_task(&open[1])
        .await
        .expect("fifth completion should succeed");
    assert_eq!(fifth.reward, None);
    assert_eq!(fifth.user.level, 3);
    assert_eq!(fifth.user.money, 30);
}

#[tokio::test]
async fn given_count_at_multiple_of_level_when_level_more_tasks_completed_then_exactly_one_level_up()
 {
    for level in 2..=5u32 {
        let (state, open) = seeded_state("user-a", level, level, level);
        let engine = ProgressionEngine::new(Arc::new(InMemoryStore::with_state(state)));

        let mut grants = Vec::new();
        for task_id in &open {
            let outcome = engine
                .complete_task(task_id)
                .await
                .expect("completion should succeed");
            grants.extend(outcome.reward);
        }

        assert_eq!(grants.len(), 1, "level {level} should rise exactly once");
        assert_eq!(grants[0].from_level, level);
        assert_eq!(grants[0].amount, u64::from(level) * 10);
        let user = engine.get_user("user-a").await.expect("user should exist");
        assert_eq!(user.level, level + 1);
    }
}

#[tokio::test]
async fn given_completed_task_when_completed_again_then_invalid_state_and_nothing_changes() {
    let store = Arc::new(InMemoryStore::new());
    let engine = ProgressionEngine::new(store.clone());
    let task = engine
        .create_task(new_task("user-a", "Flashcards", 15))
        .await
        .expect("task should be created");
    engine
        .complete_task(&task.id)
        .await
        .expect("first completion should succeed");
    let before = store.snapshot().await;

    let err = engine
        .complete_task(&task.id)
        .await
        .expect_err("second completion must fail");

    assert_eq!(err.kind, ProgressionErrorKind::InvalidState);
    assert!(!err.retryable());
    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn given_unknown_task_when_completed_then_not_found() {
    let engine = ProgressionEngine::in_memory();

    let err = engine
        .complete_task("missing-task")
        .await
        .expect_err("unknown task must fail");

    assert_eq!(err.kind, ProgressionErrorKind::NotFound);
}

#[tokio::test]
async fn given_invalid_task_input_when_created_then_validation_error_and_no_task_stored() {
    let store = Arc::new(InMemoryStore::new());
    let engine = ProgressionEngine::new(store.clone());

    for request in [
        new_task("user-a", "   ", 30),
        new_task("user-a", "Essay outline", 0),
        new_task("  ", "Essay outline", 30),
        new_task("user-a", &"x".repeat(201), 30),
    ] {
        let err = engine
            .create_task(request)
            .await
            .expect_err("invalid task must be rejected");
        assert_eq!(err.kind, ProgressionErrorKind::Validation);
    }

    assert!(store.snapshot().await.tasks.is_empty());
}

#[tokio::test]
async fn given_task_text_with_padding_when_created_then_it_is_trimmed() {
    let engine = ProgressionEngine::in_memory();
    let mut request = new_task("  user-a ", "  Lab report  ", 50);
    request.description = Some("   ".to_string());

    let task = engine
        .create_task(request)
        .await
        .expect("task should be created");

    assert_eq!(task.user_id, "user-a");
    assert_eq!(task.title, "Lab report");
    assert_eq!(task.description, None);
}

#[tokio::test]
async fn given_unseen_user_when_fetched_then_defaults_and_display_name_apply() {
    let engine = ProgressionEngine::in_memory().with_display_names(BTreeMap::from([(
        "user-a".to_string(),
        "Learner A".to_string(),
    )]));

    let named = engine.get_user("user-a").await.expect("user should be created");
    let unnamed = engine.get_user("user-z").await.expect("user should be created");

    assert_eq!(named.name, "Learner A");
    assert_eq!((named.level, named.money), (1, 0));
    assert_eq!(unnamed.name, "user-z");

    let again = engine.get_user("user-a").await.expect("user should be found");
    assert_eq!(again, named);
}

#[tokio::test]
async fn given_sequence_of_completions_then_level_and_money_never_decrease() {
    let store = Arc::new(InMemoryStore::new());
    let engine = ProgressionEngine::new(store.clone());
    let mut previous = engine.get_user("user-a").await.expect("user should exist");

    for index in 0..8 {
        let task = engine
            .create_task(new_task("user-a", &format!("Drill {index}"), 20))
            .await
            .expect("task should be created");
        let outcome = engine
            .complete_task(&task.id)
            .await
            .expect("completion should succeed");
        assert!(outcome.user.level >= previous.level);
        assert!(outcome.user.money >= previous.money);
        previous = outcome.user;
    }

    let rewards = engine.rewards("user-a").await.expect("rewards should list");
    assert_eq!(
        previous.money,
        rewards.iter().map(|reward| reward.amount).sum::<u64>()
    );
    assert_eq!(u64::from(previous.level), 1 + rewards.len() as u64);
    assert!(rewards.windows(2).all(|pair| pair[0].seq_no < pair[1].seq_no));
    assert_ledger_consistency(&store.snapshot().await).expect("state should stay consistent");
}

#[tokio::test]
async fn given_rewarded_user_when_summarized_then_tier_and_counts_reflect_balance() {
    let (state, _) = seeded_state("user-a", 5, 6, 2);
    let engine = ProgressionEngine::new(Arc::new(InMemoryStore::with_state(state)));

    let summary = engine
        .user_summary("user-a")
        .await
        .expect("summary should build");

    // 10 + 20 + 30 + 40
    assert_eq!(summary.user.money, 100);
    assert_eq!(summary.tier.title, "Comfortable");
    assert_eq!(
        summary.next_tier.map(|tier| tier.title),
        Some("Middle Class".to_string())
    );
    assert_eq!(summary.completed_tasks, 6);
    assert_eq!(summary.total_tasks, 8);
    assert_eq!(summary.reward_count, 4);
}

/// Delegates to an in-memory store but can refuse the next completion commit
/// or pretend that no user exists.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    fail_next_commit: AtomicBool,
    hide_users: AtomicBool,
    commit_attempts: AtomicUsize,
}

#[async_trait]
impl ProgressionStore for FlakyStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ProgressionError> {
        if self.hide_users.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_user(user_id).await
    }

    async fn insert_user_if_absent(&self, user: User) -> Result<User, ProgressionError> {
        self.inner.insert_user_if_absent(user).await
    }

    async fn find_task(&self, task_id: &str) -> Result<Option<StudyTask>, ProgressionError> {
        self.inner.find_task(task_id).await
    }

    async fn insert_task(&self, task: StudyTask) -> Result<StudyTask, ProgressionError> {
        self.inner.insert_task(task).await
    }

    async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<StudyTask>, ProgressionError> {
        self.inner.tasks_for_user(user_id).await
    }

    async fn count_completed(&self, user_id: &str) -> Result<u64, ProgressionError> {
        self.inner.count_completed(user_id).await
    }

    async fn rewards_for_user(&self, user_id: &str) -> Result<Vec<Reward>, ProgressionError> {
        self.inner.rewards_for_user(user_id).await
    }

    async fn commit_completion(
        &self,
        commit: CompletionCommit,
    ) -> Result<CommittedCompletion, ProgressionError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(persistence_failure("disk unavailable"));
        }
        self.inner.commit_completion(commit).await
    }
}

#[tokio::test]
async fn given_commit_failure_when_completing_then_nothing_changes_and_retry_succeeds() {
    let store = Arc::new(FlakyStore::default());
    let engine = ProgressionEngine::new(store.clone());
    let task = engine
        .create_task(new_task("user-a", "Past paper", 90))
        .await
        .expect("task should be created");
    let before = store.inner.snapshot().await;

    store.fail_next_commit.store(true, Ordering::SeqCst);
    let err = engine
        .complete_task(&task.id)
        .await
        .expect_err("failed commit must surface");

    assert_eq!(err.kind, ProgressionErrorKind::Persistence);
    assert!(err.retryable());
    assert_eq!(store.inner.snapshot().await, before);

    let outcome = engine
        .complete_task(&task.id)
        .await
        .expect("retry should succeed");
    assert_eq!(outcome.user.level, 2);
    assert_eq!(outcome.user.money, 10);
}

#[tokio::test]
async fn given_task_whose_owner_is_missing_when_completed_then_not_found_without_commit() {
    let store = Arc::new(FlakyStore::default());
    let engine = ProgressionEngine::new(store.clone());
    let task = engine
        .create_task(new_task("user-a", "Orphaned reading", 40))
        .await
        .expect("task should be created");
    let before = store.inner.snapshot().await;

    store.hide_users.store(true, Ordering::SeqCst);
    let err = engine
        .complete_task(&task.id)
        .await
        .expect_err("completion without an owner must fail");

    assert_eq!(err.kind, ProgressionErrorKind::NotFound);
    assert!(err.message.contains("user 'user-a'"));
    assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 0);
    assert_eq!(store.inner.snapshot().await, before);
}

#[tokio::test]
async fn given_padded_identifiers_within_limits_when_created_then_accepted_after_trimming() {
    let engine = ProgressionEngine::in_memory();
    let user_id = "u".repeat(128);
    let title = "t".repeat(200);

    let task = engine
        .create_task(new_task(&format!("  {user_id}  "), &format!(" {title} "), 30))
        .await
        .expect("padded but valid input should be accepted");
    assert_eq!(task.user_id, user_id);
    assert_eq!(task.title, title);

    let err = engine
        .create_task(new_task(&"u".repeat(129), "Essay", 30))
        .await
        .expect_err("overlong user id must be rejected");
    assert_eq!(err.kind, ProgressionErrorKind::Validation);
}
