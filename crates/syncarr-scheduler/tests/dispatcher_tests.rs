
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use syncarr_config::{TasksConfig, WorkerModel};
use syncarr_scheduler::dispatcher::{Dispatcher, DispatcherState};
use syncarr_scheduler::maintenance::reset_queue;
use syncarr_scheduler::{Claim, EnqueueOptions, NewTask, Settlement, TaskSignal, TaskState};
use test_helpers::{
    default_harness, fast_tasks_config, harness, lifecycle, queue_config, queue_config_with_model,
    Harness, SleepyJob, QUEUE,
};

fn dispatcher(h: &Harness, tasks: &TasksConfig) -> Dispatcher {
    let queue = h.handle.registry().queue(QUEUE).unwrap().clone();
    Dispatcher::new(queue, h.handle.clone(), lifecycle(), tasks)
}

#[tokio::test]
async fn flaky_task_succeeds_on_fourth_attempt() {
    let h = default_harness().await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("flaky", EnqueueOptions::default()).await.unwrap();

    let mut now = Utc::now();
    let mut delays = Vec::new();
    for attempt in 1..=3 {
        let (task, settlement) = d.run_next(now).await.unwrap().expect("task was due");
        assert_eq!(settlement, Settlement::Applied);
        assert_eq!(task.attempts, attempt);
        assert_eq!(task.state, TaskState::FailedRetryable);
        assert!(task.locked_by.is_none());
        delays.push(task.retry_delay_secs);
        // Not due again until the backoff has passed
        assert!(d.run_next(now).await.unwrap().is_none());
        now += ChronoDuration::hours(1);
    }
    assert_eq!(delays, vec![6, 21, 86]);

    let (task, settlement) = d.run_next(now).await.unwrap().unwrap();
    assert_eq!(settlement, Settlement::Applied);
    assert_eq!(task.id, id);
    assert_eq!(task.attempts, 4);
    assert_eq!(task.state, TaskState::Complete);
    assert_eq!(task.result, Some(json!({ "attempt": 4 })));

    let finished = h.history.get_finished(id).await.unwrap().expect("history finalized");
    assert_eq!(finished.entry.attempts, 4);
    assert!(finished.entry.elapsed_secs > 0.0);
    assert!(finished.entry.signal_at(TaskSignal::Retrying).is_some());
    assert!(finished.entry.last_error.as_deref().unwrap_or("").contains("attempt 3"));
    assert!(h.history.load_state(id).await.unwrap().is_none());
}

#[tokio::test]
async fn retries_stop_at_the_attempt_ceiling() {
    let h = harness(
        queue_config(QUEUE, 1, 3),
        SleepyJob {
            sleep: Duration::from_millis(1),
            limit: Duration::from_secs(5),
        },
        0,
    )
    .await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("broken", EnqueueOptions::default()).await.unwrap();

    let mut now = Utc::now();
    let mut last = None;
    while let Some((task, _)) = d.run_next(now).await.unwrap() {
        last = Some(task);
        now += ChronoDuration::days(1);
    }
    let task = last.unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.attempts, 3);
    assert_eq!(task.state, TaskState::FailedPermanent);
    assert!(task.last_error.unwrap().contains("status 1"));

    let finished = h.history.get_finished(id).await.unwrap().unwrap();
    assert_eq!(finished.entry.attempts, 3);
    assert!(finished.entry.failed_at.is_some());
}

#[tokio::test]
async fn timeout_is_a_retryable_failure_without_a_stuck_lock() {
    let h = default_harness().await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("sleepy", EnqueueOptions::default()).await.unwrap();

    let started = std::time::Instant::now();
    let (task, settlement) = d.run_next(Utc::now()).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(settlement, Settlement::Applied);
    assert_eq!(task.id, id);
    assert_eq!(task.state, TaskState::FailedRetryable);
    assert!(task.locked_by.is_none());
    assert!(task.locked_at.is_none());
    assert!(task.last_error.unwrap().contains("run time"));

    let entry = h.history.load_state(id).await.unwrap().unwrap();
    assert!(entry.signal_at(TaskSignal::Interrupted).is_some());
}

#[tokio::test]
async fn unknown_task_names_fail_permanently() {
    let h = default_harness().await;
    let d = dispatcher(&h, &fast_tasks_config());
    let mut task = NewTask::new(QUEUE, "no_such_job");
    task.max_attempts = 5;
    let id = h.store.enqueue(task).await.unwrap();

    let (task, _) = d.run_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.state, TaskState::FailedPermanent);
}

#[tokio::test]
async fn enqueue_rejects_unknown_jobs() {
    let h = default_harness().await;
    assert!(h.handle.enqueue("nope", EnqueueOptions::default()).await.is_err());
}

#[tokio::test]
async fn ensure_scheduled_does_not_duplicate() {
    let h = default_harness().await;
    let opts = EnqueueOptions::with_args(json!(["a"]));
    assert!(h.handle.ensure_scheduled("echo", opts.clone()).await.unwrap().is_some());
    assert!(h.handle.ensure_scheduled("echo", opts).await.unwrap().is_none());
    assert!(h
        .handle
        .ensure_scheduled("echo", EnqueueOptions::with_args(json!(["b"])))
        .await
        .unwrap()
        .is_some());
    assert_eq!(h.store.stats(QUEUE, Utc::now()).await.unwrap().pending, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_processes_due_work_within_its_budget() {
    let h = default_harness().await;
    let d = dispatcher(&h, &fast_tasks_config());
    for n in 0..5 {
        h.handle
            .enqueue("echo", EnqueueOptions::with_args(json!([n])))
            .await
            .unwrap();
    }

    d.run(Some(Duration::from_millis(500))).await.unwrap();

    let stats = h.store.stats(QUEUE, Utc::now()).await.unwrap();
    assert_eq!(stats.complete, 5);
    assert_eq!(stats.running, 0);
    assert_eq!(d.state(), DispatcherState::Draining);
    assert_eq!(d.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_in_flight_work() {
    let h = harness(
        queue_config(QUEUE, 1, 5),
        SleepyJob {
            sleep: Duration::from_millis(300),
            limit: Duration::from_secs(5),
        },
        0,
    )
    .await;
    let lifecycle = lifecycle();
    let queue = h.handle.registry().queue(QUEUE).unwrap().clone();
    let d = Dispatcher::new(queue, h.handle.clone(), lifecycle.clone(), &fast_tasks_config());
    let id = h.handle.enqueue("sleepy", EnqueueOptions::default()).await.unwrap();

    let runner = tokio::spawn({
        let d = d.clone();
        async move { d.run(None).await }
    });
    wait_for_state(&h, id, TaskState::Running).await;
    lifecycle.request_shutdown();
    runner.await.unwrap().unwrap();

    let task = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_timeout_cancels_and_releases_work() {
    let h = harness(
        queue_config(QUEUE, 1, 5),
        SleepyJob {
            sleep: Duration::from_secs(30),
            limit: Duration::from_secs(60),
        },
        0,
    )
    .await;
    let tasks = TasksConfig {
        drain_timeout_secs: 0,
        ..fast_tasks_config()
    };
    let lifecycle = lifecycle();
    let queue = h.handle.registry().queue(QUEUE).unwrap().clone();
    let d = Dispatcher::new(queue, h.handle.clone(), lifecycle.clone(), &tasks);
    let id = h.handle.enqueue("sleepy", EnqueueOptions::default()).await.unwrap();

    let runner = tokio::spawn({
        let d = d.clone();
        async move { d.run(None).await }
    });
    wait_for_state(&h, id, TaskState::Running).await;
    lifecycle.request_shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("dispatcher stops promptly")
        .unwrap()
        .unwrap();

    let task = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::FailedRetryable);
    assert!(task.locked_by.is_none());
    let entry = h.history.load_state(id).await.unwrap().unwrap();
    assert!(entry.signal_at(TaskSignal::Canceled).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_panicking_body_does_not_take_down_its_neighbours() {
    let h = default_harness().await;
    let d = dispatcher(&h, &fast_tasks_config());
    let panicky = h.handle.enqueue("panicky", EnqueueOptions::default()).await.unwrap();
    let echo = h
        .handle
        .enqueue("echo", EnqueueOptions::with_args(json!(["still here"])))
        .await
        .unwrap();

    d.run(Some(Duration::from_millis(500))).await.unwrap();

    let failed = h.store.get(panicky).await.unwrap().unwrap();
    assert_eq!(failed.state, TaskState::FailedRetryable);
    assert!(failed.last_error.unwrap().contains("panicked"));
    assert!(failed.locked_by.is_none());
    let done = h.store.get(echo).await.unwrap().unwrap();
    assert_eq!(done.state, TaskState::Complete);
    assert_eq!(d.in_flight(), 0);
}

#[tokio::test]
async fn non_retriable_jobs_fail_after_one_attempt() {
    let h = default_harness().await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("one_shot", EnqueueOptions::default()).await.unwrap();

    let (task, settlement) = d.run_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(settlement, Settlement::Applied);
    assert_eq!(task.id, id);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.state, TaskState::FailedPermanent);
    assert!(task.last_error.unwrap().contains("status 2"));
    assert!(d.run_next(Utc::now() + ChronoDuration::days(1)).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thread_model_timeout_waits_for_the_body_to_stop() {
    let h = harness(
        queue_config_with_model(QUEUE, 1, 5, WorkerModel::Thread),
        SleepyJob {
            sleep: Duration::from_secs(10),
            limit: Duration::from_millis(100),
        },
        0,
    )
    .await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("grinder", EnqueueOptions::default()).await.unwrap();

    let (task, settlement) = d.run_next(Utc::now()).await.unwrap().unwrap();
    assert!(
        h.grinder_stopped.load(Ordering::SeqCst),
        "the body was still running when its task was settled"
    );
    assert_eq!(settlement, Settlement::Applied);
    assert_eq!(task.id, id);
    assert_eq!(task.state, TaskState::FailedRetryable);
    assert!(task.locked_by.is_none());
    assert!(task.last_error.unwrap().contains("run time"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thread_model_timeout_drops_a_waiting_body() {
    let h = harness(
        queue_config_with_model(QUEUE, 1, 5, WorkerModel::Thread),
        SleepyJob {
            sleep: Duration::from_secs(30),
            limit: Duration::from_millis(100),
        },
        0,
    )
    .await;
    let d = dispatcher(&h, &fast_tasks_config());
    h.handle.enqueue("sleepy", EnqueueOptions::default()).await.unwrap();

    let started = std::time::Instant::now();
    let (task, _) = d.run_next(Utc::now()).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(task.state, TaskState::FailedRetryable);
    assert!(task.last_error.unwrap().contains("run time"));
}

#[tokio::test]
async fn abandoned_final_attempts_are_reported() {
    let h = harness(
        queue_config(QUEUE, 1, 1),
        SleepyJob {
            sleep: Duration::from_millis(1),
            limit: Duration::from_secs(5),
        },
        0,
    )
    .await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("echo", EnqueueOptions::default()).await.unwrap();
    let queue = h.handle.registry().queue(QUEUE).unwrap().clone();
    let policy = h.handle.registry().claim_policy(&queue);
    let now = Utc::now();
    match h.store.claim_next(QUEUE, "ghost", now, &policy).await.unwrap() {
        Some(Claim::Ready(task)) => assert_eq!(task.id, id),
        other => panic!("expected a ready claim, got {other:?}"),
    }

    // The ghost worker never settles; once its lock is stale the task is failed for good
    assert!(d.run_next(now + ChronoDuration::hours(1)).await.unwrap().is_none());

    let task = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::FailedPermanent);
    assert_eq!(task.attempts, 1);
    let finished = h.history.get_finished(id).await.unwrap().expect("history finalized");
    assert!(finished.entry.signal_at(TaskSignal::Error).is_some());
    assert!(finished.entry.failed_at.is_some());
}

#[tokio::test]
async fn history_cache_only_holds_executing_tasks() {
    let h = default_harness().await;
    for _ in 0..100 {
        let opts = EnqueueOptions {
            replace_existing: true,
            ..EnqueueOptions::with_args(json!(["same"]))
        };
        h.handle.enqueue("echo", opts).await.unwrap();
    }
    assert_eq!(h.recorder.cached_len().await, 0);

    reset_queue(h.store.as_ref(), QUEUE, |_| {}).await.unwrap();
    assert_eq!(h.recorder.cached_len().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn history_cache_releases_tasks_once_they_finish() {
    let h = harness(
        queue_config(QUEUE, 1, 5),
        SleepyJob {
            sleep: Duration::from_millis(300),
            limit: Duration::from_secs(5),
        },
        0,
    )
    .await;
    let d = dispatcher(&h, &fast_tasks_config());
    let id = h.handle.enqueue("sleepy", EnqueueOptions::default()).await.unwrap();

    let runner = tokio::spawn({
        let d = d.clone();
        async move { d.run_next(Utc::now()).await }
    });
    wait_for_state(&h, id, TaskState::Running).await;
    // Executing is emitted right after the claim
    let mut cached = false;
    for _ in 0..50 {
        if h.recorder.cached(id).await.is_some() {
            cached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cached, "a running task keeps its history cached");

    let (task, _) = runner.await.unwrap().unwrap().unwrap();
    assert_eq!(task.state, TaskState::Complete);
    assert_eq!(h.recorder.cached_len().await, 0);
}

async fn wait_for_state(h: &Harness, id: syncarr_scheduler::TaskId, state: TaskState) {
    for _ in 0..200 {
        if h.store.get(id).await.unwrap().map(|t| t.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached {state}");
}
