use std::time::Duration;

use crew::config::WorkerConfig;
use crew::error::ErrorKind;
use crew::latch::LatchState;
use crew::shutdown::create_shutdown_channel;
use crew::sink::create_error_channel;
use crew::test_utils::actions::{FailingAction, RecordingAction};
use crew::test_utils::lifecycle::spawn_started;
use crew::worker::{ErrorWorker, Worker};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn worker_processes_enqueued_items_in_order() {
    init_test_tracing();

    let action = RecordingAction::new();
    let worker = Worker::new(WorkerConfig { max_work: 16 }, action.clone());

    spawn_started(&worker).await;
    assert_eq!(worker.state(), LatchState::Started);

    let processed = action.wait_for_count(5);
    for item in 0..5u64 {
        worker.enqueue(item).await.unwrap();
    }
    processed.notified().await;

    assert_eq!(action.items(), vec![0, 1, 2, 3, 4]);

    worker.stop().await.unwrap();
    assert_eq!(worker.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_processes_every_enqueued_item() {
    init_test_tracing();

    let action = RecordingAction::new();
    let worker = Worker::new(WorkerConfig { max_work: 128 }, action.clone());

    spawn_started(&worker).await;

    for item in 0..100u64 {
        worker.enqueue(item).await.unwrap();
    }
    worker.close().await.unwrap();

    // Items still queued at close time were drained, none lost.
    assert_eq!(action.items(), (0..100).collect::<Vec<_>>());

    let err = worker.enqueue(100).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueueClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_processes_pending_items_and_resumes() {
    init_test_tracing();

    let action = RecordingAction::new().with_delay(Duration::from_millis(10));
    let worker = Worker::new(WorkerConfig { max_work: 32 }, action.clone());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    spawn_started(&worker).await;

    for item in 0..10u64 {
        worker.enqueue(item).await.unwrap();
    }
    worker.drain(shutdown_rx).await.unwrap();

    // Everything enqueued before the drain was processed by the time it
    // returned, and the worker came back up.
    assert_eq!(action.items().len(), 10);
    assert_eq!(worker.state(), LatchState::Started);

    let processed = action.wait_for_count(11);
    worker.enqueue(10).await.unwrap();
    processed.notified().await;

    worker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_action_reports_errors_and_keeps_processing() {
    init_test_tracing();

    let recording = RecordingAction::new();
    let action = {
        let recording = recording.clone();
        move |item: u64| {
            let recording = recording.clone();
            async move {
                if item == 2 {
                    panic!("poisoned work item");
                }
                recording.record(item);
                Ok(())
            }
        }
    };

    let (errors_tx, mut errors_rx) = create_error_channel(16);
    let worker = Worker::new(WorkerConfig { max_work: 16 }, action).with_errors(errors_tx);

    spawn_started(&worker).await;

    let processed = recording.wait_for_count(4);
    for item in 0..5u64 {
        worker.enqueue(item).await.unwrap();
    }
    processed.notified().await;

    let err = errors_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::ActionPanic);

    // The poisoned item degraded to an error; the loop survived it.
    assert_eq!(recording.items(), vec![0, 1, 3, 4]);
    assert_eq!(worker.state(), LatchState::Started);

    worker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_action_forwards_errors_to_sink() {
    init_test_tracing();

    let (errors_tx, mut errors_rx) = create_error_channel(4);
    let worker = Worker::new(
        WorkerConfig::default(),
        FailingAction::new("destination rejected the item"),
    )
    .with_errors(errors_tx);

    spawn_started(&worker).await;

    worker.enqueue(7u64).await.unwrap();

    let err = errors_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::ActionFailed);

    worker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn error_worker_collects_errors_from_other_components() {
    init_test_tracing();

    let collected = RecordingAction::new();
    let error_worker: ErrorWorker<_> =
        ErrorWorker::new(WorkerConfig { max_work: 16 }, collected.clone());

    spawn_started(&error_worker).await;

    let failing = Worker::new(WorkerConfig::default(), FailingAction::new("flaky action"))
        .with_errors(error_worker.error_sink().unwrap());

    spawn_started(&failing).await;

    let seen = collected.wait_for_count(2);
    failing.enqueue(1u32).await.unwrap();
    failing.enqueue(2u32).await.unwrap();
    seen.notified().await;

    for err in collected.items() {
        assert_eq!(err.kind(), ErrorKind::ActionFailed);
    }

    failing.stop().await.unwrap();
    error_worker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_signal_stops_the_worker() {
    init_test_tracing();

    let action = RecordingAction::<u64>::new();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let worker = Worker::new(WorkerConfig { max_work: 8 }, action).with_shutdown(shutdown_rx);

    spawn_started(&worker).await;

    let mut stopped = worker.notify_stopped();
    shutdown_tx.shutdown();
    stopped.wait().await;

    assert_eq!(worker.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_twice_fails() {
    init_test_tracing();

    let worker = Worker::new(WorkerConfig::default(), RecordingAction::<u64>::new());

    spawn_started(&worker).await;

    let err = worker.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CannotStart);

    worker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_with_zero_capacity_fails() {
    init_test_tracing();

    let worker = Worker::new(WorkerConfig { max_work: 0 }, RecordingAction::<u64>::new());

    let err = worker.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}
