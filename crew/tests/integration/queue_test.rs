use std::time::Duration;

use crew::config::{QueueConfig, WorkerConfig};
use crew::error::ErrorKind;
use crew::latch::LatchState;
use crew::queue::{ErrorQueue, Queue};
use crew::sink::create_error_channel;
use crew::test_utils::actions::{FailingAction, RecordingAction};
use crew::test_utils::lifecycle::spawn_started;
use crew::worker::Worker;
use telemetry::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn queue_processes_every_item_exactly_once() {
    init_test_tracing();

    let action = RecordingAction::new();
    let queue = Queue::new(
        QueueConfig {
            parallelism: 4,
            max_work: 256,
        },
        action.clone(),
    );

    spawn_started(&queue).await;

    let processed = action.wait_for_count(200);
    for item in 0..200u64 {
        queue.enqueue(item).await.unwrap();
    }
    processed.notified().await;

    // Completion order across the pool is unspecified; presence is not.
    let mut items = action.items();
    items.sort_unstable();
    assert_eq!(items, (0..200).collect::<Vec<_>>());

    queue.stop().await.unwrap();
    assert_eq!(queue.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_pause_suspends_dispatch_and_resume_processes_backlog() {
    init_test_tracing();

    let action = RecordingAction::new();
    let queue = Queue::new(
        QueueConfig {
            parallelism: 2,
            max_work: 16,
        },
        action.clone(),
    );

    spawn_started(&queue).await;

    let processed = action.wait_for_count(2);
    queue.enqueue(0u64).await.unwrap();
    queue.enqueue(1).await.unwrap();
    processed.notified().await;

    let mut paused = queue.notify_paused();
    queue.pause().unwrap();
    paused.wait().await;
    assert_eq!(queue.state(), LatchState::Paused);

    // Items enqueued into a paused queue accumulate in the input channel.
    for item in 2..5u64 {
        queue.enqueue(item).await.unwrap();
    }
    sleep(Duration::from_millis(150)).await;
    assert_eq!(action.items().len(), 2);

    let backlog = action.wait_for_count(5);
    queue.resume().unwrap();
    backlog.notified().await;

    let mut items = action.items();
    items.sort_unstable();
    assert_eq!(items, (0..5).collect::<Vec<_>>());

    queue.stop().await.unwrap();
    queue.close().await.unwrap();
    assert_eq!(queue.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_stop_while_paused_fails() {
    init_test_tracing();

    let queue = Queue::new(
        QueueConfig {
            parallelism: 2,
            max_work: 8,
        },
        RecordingAction::<u64>::new(),
    );

    spawn_started(&queue).await;

    let mut paused = queue.notify_paused();
    queue.pause().unwrap();
    paused.wait().await;

    // Stop is only legal from the running state.
    let err = queue.stop().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CannotStop);

    let err = queue.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CannotClose);

    let mut restarted = queue.notify_started();
    queue.resume().unwrap();
    restarted.wait().await;

    queue.stop().await.unwrap();
    assert_eq!(queue.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_fails_before_start() {
    init_test_tracing();

    let queue = Queue::new(QueueConfig::default(), RecordingAction::<u64>::new());

    let err = queue.enqueue(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueueClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_forwards_worker_errors_to_sink() {
    init_test_tracing();

    let (errors_tx, mut errors_rx) = create_error_channel(16);
    let queue = Queue::new(
        QueueConfig {
            parallelism: 2,
            max_work: 16,
        },
        FailingAction::new("poisoned batch"),
    )
    .with_errors(errors_tx);

    spawn_started(&queue).await;

    for item in 0..3u32 {
        queue.enqueue(item).await.unwrap();
    }

    for _ in 0..3 {
        let err = errors_rx.recv().await.unwrap();
        assert_eq!(err.kind(), ErrorKind::ActionFailed);
    }

    queue.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn error_queue_collects_errors_in_parallel() {
    init_test_tracing();

    let collected = RecordingAction::new();
    let error_queue: ErrorQueue<_> = ErrorQueue::new(
        QueueConfig {
            parallelism: 2,
            max_work: 32,
        },
        collected.clone(),
    );

    spawn_started(&error_queue).await;

    let failing = Worker::new(WorkerConfig { max_work: 8 }, FailingAction::new("flaky action"))
        .with_errors(error_queue.error_sink().unwrap());

    spawn_started(&failing).await;

    let seen = collected.wait_for_count(4);
    for item in 0..4u32 {
        failing.enqueue(item).await.unwrap();
    }
    seen.notified().await;

    failing.stop().await.unwrap();
    error_queue.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_start_twice_fails() {
    init_test_tracing();

    let queue = Queue::new(
        QueueConfig {
            parallelism: 2,
            max_work: 8,
        },
        RecordingAction::<u64>::new(),
    );

    spawn_started(&queue).await;

    let err = queue.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CannotStart);

    queue.stop().await.unwrap();
}
