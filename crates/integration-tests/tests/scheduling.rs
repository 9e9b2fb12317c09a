//! Fleet scheduling against PostgreSQL
//!
//! Several instances, each with its own dedicated lock session, sharing one
//! schema. Skipped unless TASKWARDEN_TEST_DATABASE_URL is set.

mod common;

use common::{wait_until, TestDb, EVERY_SECOND, YEARLY};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use taskwarden_core::application::{HandlerRegistry, TaskState};
use taskwarden_core::domain::HistoryStatus;
use taskwarden_core::port::job_handler::mocks::MockJobHandler;
use taskwarden_core::port::{LockSession, TaskStore};

fn registry(kind: &str, handler: Arc<MockJobHandler>) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(kind, handler)
        .unwrap()
        .build()
}

/// Mutual exclusion: every representative is owned by exactly one instance
#[tokio::test]
async fn test_mutual_exclusion_across_instances() {
    let Some(db) = TestDb::setup("mutual_exclusion").await else {
        return;
    };
    let ids = db
        .replace_tasks(&[
            ("a", "0 0 1 1 *", "noop"),
            ("b", "0 0 2 1 *", "noop"),
            ("c", "0 0 3 1 *", "noop"),
            ("d", "0 0 4 1 *", "noop"),
            ("a-duplicate", "0 0 1 1 *", "noop"),
        ])
        .await;
    let handler = Arc::new(MockJobHandler::new_success());

    let (one, _s1) = db.instance("instance-1", registry("noop", handler.clone())).await;
    let (two, _s2) = db.instance("instance-2", registry("noop", handler.clone())).await;
    let (three, _s3) = db.instance("instance-3", registry("noop", handler)).await;

    let (r1, r2, r3) = tokio::join!(one.start(), two.start(), three.start());
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();

    let mut owned = Vec::new();
    for service in [&one, &two, &three] {
        for id in service.owned_task_ids() {
            assert_eq!(
                db.owner_of(id).await.as_deref(),
                Some(service.identity().instance_id.as_str())
            );
            owned.push(id);
        }
    }
    let unique: HashSet<_> = owned.iter().copied().collect();
    assert_eq!(unique.len(), owned.len(), "a task is owned twice");
    // The duplicate schedule is never claimed
    assert_eq!(unique, ids[..4].iter().copied().collect());
    assert_eq!(db.owner_of(ids[4]).await, None);

    for service in [&one, &two, &three] {
        service.shutdown().await;
    }
    db.teardown().await;
    println!("✅ Each task owned by exactly one instance");
}

/// Crash recovery: a dead owner's rows are cleared and re-claimed by a
/// survivor within one reclaim cycle
#[tokio::test]
async fn test_crash_recovery_via_reclaim() {
    let Some(db) = TestDb::setup("crash_recovery").await else {
        return;
    };
    let ids = db
        .replace_tasks(&[("a", YEARLY, "noop"), ("b", "0 0 2 1 *", "noop")])
        .await;
    let handler = Arc::new(MockJobHandler::new_success());

    let (crashed, crashed_session) = db.instance("crashed", registry("noop", handler.clone())).await;
    crashed.start().await.unwrap();
    assert_eq!(crashed.active_task_count(), 2);

    // The backend session ends; the server drops its locks, the rows stay
    crashed_session.close().await;

    let (survivor, _session) = db.instance("survivor", registry("noop", handler)).await;
    survivor.start().await.unwrap();
    // Rows still name the crashed instance, so nothing is claimed at boot
    assert_eq!(survivor.active_task_count(), 0);

    let report = survivor.reclaim_once().await.unwrap();
    assert_eq!(report.orphans_cleared, 2);
    assert_eq!(report.claimed, 2);
    for id in &ids {
        assert_eq!(db.owner_of(*id).await.as_deref(), Some("survivor"));
    }

    // The crashed instance notices the loss and does not touch the new rows
    let report = crashed.reclaim_once().await.unwrap();
    assert_eq!(report.lost, 2);
    assert_eq!(crashed.active_task_count(), 0);
    for id in &ids {
        assert_eq!(db.owner_of(*id).await.as_deref(), Some("survivor"));
    }

    crashed.shutdown().await;
    survivor.shutdown().await;
    db.teardown().await;
    println!("✅ Orphaned ownership recovered");
}

/// Successful firings write completed history and advance last_run_at
#[tokio::test]
async fn test_successful_firing_records_history() {
    let Some(db) = TestDb::setup("successful_firing").await else {
        return;
    };
    let ids = db.replace_tasks(&[("tick", EVERY_SECOND, "tick")]).await;
    let handler = Arc::new(MockJobHandler::new_success());
    let (service, _session) = db.instance("ticker", registry("tick", handler.clone())).await;
    service.start().await.unwrap();

    let store = db.store();
    let completed = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        let task_id = ids[0];
        async move {
            store
                .history_for(task_id)
                .await
                .unwrap()
                .iter()
                .any(|h| h.status == HistoryStatus::Completed)
        }
    })
    .await;
    assert!(completed, "no completed firing recorded");

    service.shutdown().await;

    let task = store.find_by_id(ids[0]).await.unwrap().unwrap();
    assert!(task.last_run_at.is_some());
    assert!(task.is_unowned(), "shutdown must clear ownership");
    let history = store.history_for(ids[0]).await.unwrap();
    assert!(history
        .iter()
        .filter(|h| h.status == HistoryStatus::Completed)
        .all(|h| h.finished_at.is_some() && h.error.is_none()));
    assert!(handler.call_count() >= 1);

    db.teardown().await;
    println!("✅ Completed history recorded");
}

/// A failing handler leaves one failed row, clears ownership, and the task
/// is not retried by the same instance
#[tokio::test]
async fn test_failure_bookkeeping() {
    let Some(db) = TestDb::setup("failure_bookkeeping").await else {
        return;
    };
    let ids = db.replace_tasks(&[("broken", EVERY_SECOND, "broken")]).await;
    let handler = Arc::new(MockJobHandler::new_fail("boom"));
    let (service, _session) = db.instance("failing", registry("broken", handler.clone())).await;
    service.start().await.unwrap();

    let store = db.store();
    let failed = wait_until(Duration::from_secs(5), || {
        let service = service.clone();
        let task_id = ids[0];
        async move { service.state_of(task_id) == TaskState::Unclaimed }
    })
    .await;
    assert!(failed, "task was never relinquished");

    let history = store.history_for(ids[0]).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Failed);
    assert_eq!(history[0].error.as_deref(), Some("boom"));
    assert_eq!(db.owner_of(ids[0]).await, None);

    // Free for others, but not re-claimed here
    let report = service.reclaim_once().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(handler.call_count(), 1);
    let probe = db.lock_session().await;
    assert!(!probe.is_locked_anywhere(ids[0]).await.unwrap());

    service.shutdown().await;
    probe.close().await;
    db.teardown().await;
    println!("✅ Failure recorded and task relinquished");
}

/// Shutdown releases every lock and clears every owned row
#[tokio::test]
async fn test_shutdown_releases_ownership() {
    let Some(db) = TestDb::setup("shutdown_release").await else {
        return;
    };
    // Seeded standard tasks, all long-period enough not to fire mid-test
    // except the 30-second one, which is harmless
    let handler = Arc::new(MockJobHandler::new_success());
    let mut builder = HandlerRegistry::builder();
    for kind in [
        "thirty_second_task",
        "minute_task",
        "two_minute_task",
        "five_minute_task",
        "ten_minute_task",
        "quarter_hour_task",
        "half_hour_task",
        "hourly_task",
        "two_hour_task",
        "four_hour_task",
        "daily_task",
        "weekly_task",
        "monthly_task",
    ] {
        builder = builder.register(kind, handler.clone()).unwrap();
    }
    let (service, _session) = db.instance("leaving", builder.build()).await;
    service.start().await.unwrap();
    assert_eq!(service.active_task_count(), 13);
    let owned = service.owned_task_ids();

    service.shutdown().await;
    service.shutdown().await;

    let probe = db.lock_session().await;
    for id in owned {
        assert_eq!(db.owner_of(id).await, None);
        assert!(probe.try_lock(id).await.unwrap(), "task {} still locked", id);
    }
    probe.close().await;
    db.teardown().await;
    println!("✅ Shutdown released all tasks");
}
