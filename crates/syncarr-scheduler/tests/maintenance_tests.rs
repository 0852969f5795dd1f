
use std::cell::Cell;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use syncarr_config::PriorityOrdering;
use syncarr_domain::{Source, SourceKind};
use syncarr_infrastructure::repositories::SourceRepository;
use syncarr_infrastructure::sqlite_adapters::{SqliteMediaRepository, SqliteSourceRepository};
use syncarr_scheduler::maintenance::{delete_source, reset_queue, ResetStatus};
use syncarr_scheduler::{Claim, ClaimPolicy, EnqueueOptions, QueueStats, Settlement, TaskState};
use test_helpers::{default_harness, QUEUE};

#[tokio::test]
async fn reset_empties_the_queue_and_reports_once() {
    let h = default_harness().await;
    for n in 0..10 {
        h.handle
            .enqueue("echo", EnqueueOptions::with_args(json!([n])))
            .await
            .unwrap();
    }
    for n in 0..2 {
        h.handle
            .enqueue(
                "echo",
                EnqueueOptions {
                    args: json!(["later", n]),
                    eta: Some(Utc::now() + ChronoDuration::hours(1)),
                    ..EnqueueOptions::default()
                },
            )
            .await
            .unwrap();
    }
    let before = h.store.stats(QUEUE, Utc::now()).await.unwrap();
    assert_eq!((before.pending, before.scheduled), (10, 2));

    let calls = Cell::new(0);
    let status = Cell::new(None);
    reset_queue(h.store.as_ref(), QUEUE, |s| {
        calls.set(calls.get() + 1);
        status.set(Some(s));
    })
    .await
    .unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(status.get(), Some(ResetStatus::Finished));
    let after = h.store.stats(QUEUE, Utc::now()).await.unwrap();
    assert_eq!(after, QueueStats::default());
    assert_eq!(after.total(), 0);
}

#[tokio::test]
async fn deleting_a_source_revokes_everything_it_owns() {
    let h = default_harness().await;
    let sources = SqliteSourceRepository::new(h.pool.clone());
    let media = SqliteMediaRepository::new(h.pool.clone());
    let source = sources
        .create(Source::new("Talks", SourceKind::Channel, "UC123", "talks"))
        .await
        .unwrap();
    let owner = source.id.to_string();

    let owned = |n: i64| EnqueueOptions {
        args: json!([owner, n]),
        owner: Some(owner.clone()),
        ..EnqueueOptions::default()
    };
    let running_id = h.handle.enqueue("echo", owned(0)).await.unwrap();
    let policy = ClaimPolicy {
        ordering: PriorityOrdering::Descending,
        lock_timeout: std::time::Duration::from_secs(60),
    };
    match h.store.claim_next(QUEUE, "w", Utc::now(), &policy).await.unwrap() {
        Some(Claim::Ready(task)) => assert_eq!(task.id, running_id),
        other => panic!("expected the owned task, got {other:?}"),
    }
    let pending_a = h.handle.enqueue("echo", owned(1)).await.unwrap();
    let pending_b = h.handle.enqueue("echo", owned(2)).await.unwrap();
    let unrelated = h
        .handle
        .enqueue("echo", EnqueueOptions::with_args(json!(["other"])))
        .await
        .unwrap();

    let revoked = delete_source(&h.pool, &sources, &media, &h.handle, &[], source.id)
        .await
        .unwrap()
        .expect("source existed");
    let mut revoked_ids: Vec<_> = revoked.iter().map(|t| t.id).collect();
    revoked_ids.sort();
    let mut expected = vec![running_id, pending_a, pending_b];
    expected.sort();
    assert_eq!(revoked_ids, expected);

    for id in [running_id, pending_a, pending_b] {
        assert_eq!(h.store.get(id).await.unwrap().unwrap().state, TaskState::Revoked);
    }
    assert_eq!(h.store.get(unrelated).await.unwrap().unwrap().state, TaskState::Pending);
    assert!(sources.get(source.id).await.unwrap().is_none());

    // The running task finishes, but its outcome is discarded
    let settled = h
        .store
        .complete(running_id, "w", &json!(null), Utc::now())
        .await
        .unwrap();
    assert_eq!(settled, Settlement::Gone);

    assert!(h.history.get_finished(pending_a).await.unwrap().is_some());
    let again = delete_source(&h.pool, &sources, &media, &h.handle, &[], source.id)
        .await
        .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn deleting_a_source_keeps_other_sources_intact() {
    let h = default_harness().await;
    let sources = Arc::new(SqliteSourceRepository::new(h.pool.clone()));
    let media = SqliteMediaRepository::new(h.pool.clone());
    let doomed = sources
        .create(Source::new("Doomed", SourceKind::Playlist, "PL1", "doomed"))
        .await
        .unwrap();
    let kept = sources
        .create(Source::new("Kept", SourceKind::Playlist, "PL2", "kept"))
        .await
        .unwrap();
    let kept_task = h
        .handle
        .enqueue(
            "echo",
            EnqueueOptions {
                owner: Some(kept.id.to_string()),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    let revoked = delete_source(&h.pool, sources.as_ref(), &media, &h.handle, &[], doomed.id)
        .await
        .unwrap()
        .unwrap();
    assert!(revoked.is_empty());
    assert!(sources.get(kept.id).await.unwrap().is_some());
    assert_eq!(h.store.get(kept_task).await.unwrap().unwrap().state, TaskState::Pending);
}
