use std::sync::Arc;

use futures_util::future::join_all;
use studyquest::progression::{
    InMemoryStore, ProgressionEngine, ProgressionErrorKind, assert_ledger_consistency,
};

use super::{new_task, seeded_state};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_one_step_before_level_up_when_two_tasks_complete_concurrently_then_exactly_one_reward()
 {
    let (state, open) = seeded_state("user-a", 2, 3, 2);
    let store = Arc::new(InMemoryStore::with_state(state));
    let engine = Arc::new(ProgressionEngine::new(store.clone()));

    let handles = open.iter().cloned().map(|task_id| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.complete_task(&task_id).await })
    });
    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            joined
                .expect("completion task should not panic")
                .expect("completion should succeed")
        })
        .collect();

    let grants: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| outcome.reward)
        .collect();
    assert_eq!(grants.len(), 1);
    assert_eq!((grants[0].from_level, grants[0].to_level), (2, 3));
    assert_eq!(grants[0].amount, 20);

    let user = engine.get_user("user-a").await.expect("user should exist");
    assert_eq!(user.level, 3);
    assert_eq!(user.money, 30);
    assert_ledger_consistency(&store.snapshot().await).expect("state should stay consistent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_same_task_completed_concurrently_then_one_succeeds_and_rest_are_invalid_state() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(ProgressionEngine::new(store.clone()));
    let task = engine
        .create_task(new_task("user-a", "Mock exam", 120))
        .await
        .expect("task should be created");

    let handles = (0..8).map(|_| {
        let engine = Arc::clone(&engine);
        let task_id = task.id.clone();
        tokio::spawn(async move { engine.complete_task(&task_id).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("completion task should not panic"))
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|result| result.as_ref().err()).all(
        |err| err.kind == ProgressionErrorKind::InvalidState
    ));

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.rewards.len(), 1);
    assert_eq!(snapshot.users["user-a"].money, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_many_users_completing_in_parallel_then_ledger_stays_consistent() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(ProgressionEngine::new(store.clone()));

    let mut task_ids = Vec::new();
    for user in ["user-a", "user-b", "user-c"] {
        for index in 0..6 {
            let task = engine
                .create_task(new_task(user, &format!("Session {index}"), 25))
                .await
                .expect("task should be created");
            task_ids.push(task.id);
        }
    }

    let handles = task_ids.into_iter().map(|task_id| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.complete_task(&task_id).await })
    });
    for joined in join_all(handles).await {
        joined
            .expect("completion task should not panic")
            .expect("completion should succeed");
    }

    let snapshot = store.snapshot().await;
    assert_ledger_consistency(&snapshot).expect("state should stay consistent");
    for user in ["user-a", "user-b", "user-c"] {
        let rewards = engine.rewards(user).await.expect("rewards should list");
        let user = &snapshot.users[user];
        assert_eq!(u64::from(user.level), 1 + rewards.len() as u64);
        assert_eq!(
            user.money,
            rewards.iter().map(|reward| reward.amount).sum::<u64>()
        );
    }
}
