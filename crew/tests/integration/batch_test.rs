use crew::batch::Batch;
use crew::config::BatchConfig;
use crew::shutdown::create_shutdown_channel;
use crew::test_utils::actions::RecordingAction;
use telemetry::init_test_tracing;
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread")]
async fn batch_processes_all_channel_items() {
    init_test_tracing();

    let (work_tx, work_rx) = mpsc::channel(64);
    for item in 0..50u64 {
        work_tx.send(item).await.unwrap();
    }

    let action = RecordingAction::new();
    let batch = Batch::new(BatchConfig { parallelism: 4 }, action.clone(), work_rx);

    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    batch.process(shutdown_rx).await.unwrap();

    // Every item landed exactly once by the time process returned.
    let mut items = action.items();
    items.sort_unstable();
    assert_eq!(items, (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_batch_returns_immediately() {
    init_test_tracing();

    let (_work_tx, work_rx) = mpsc::channel::<u64>(8);

    let action = RecordingAction::new();
    let batch = Batch::new(BatchConfig { parallelism: 2 }, action.clone(), work_rx);

    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    batch.process(shutdown_rx).await.unwrap();

    assert!(action.items().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_stops_early_when_shutdown_already_fired() {
    init_test_tracing();

    let (work_tx, work_rx) = mpsc::channel(64);
    for item in 0..20u64 {
        work_tx.send(item).await.unwrap();
    }

    let action = RecordingAction::new();
    let batch = Batch::new(BatchConfig { parallelism: 2 }, action.clone(), work_rx);

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    shutdown_tx.shutdown();

    batch.process(shutdown_rx).await.unwrap();

    assert!(action.items().is_empty());
}
