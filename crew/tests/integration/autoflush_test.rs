use std::time::Duration;

use crew::autoflush::AutoflushBuffer;
use crew::config::BufferConfig;
use crew::error::ErrorKind;
use crew::latch::LatchState;
use crew::test_utils::actions::RecordingHandler;
use crew::test_utils::lifecycle::spawn_started;
use telemetry::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn buffer_flushes_once_at_max_len() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let buffer = AutoflushBuffer::new(
        BufferConfig {
            max_len: 5,
            interval_ms: 60_000,
            flush_on_stop: true,
        },
        handler.clone(),
    );

    spawn_started(&buffer).await;

    let flushed = handler.wait_for_batches(1);
    for item in 0..5u64 {
        buffer.add(item).unwrap();
    }
    flushed.notified().await;

    assert_eq!(handler.batches(), vec![vec![0, 1, 2, 3, 4]]);

    buffer.stop().await.unwrap();

    // The store was already empty, so the stop flush had nothing to hand
    // over and the handler never ran again.
    assert_eq!(handler.batches().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn buffer_flushes_on_interval() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let buffer = AutoflushBuffer::new(
        BufferConfig {
            max_len: 1024,
            interval_ms: 200,
            flush_on_stop: false,
        },
        handler.clone(),
    );

    spawn_started(&buffer).await;

    let flushed = handler.wait_for_total_items(3);
    buffer.add_many(0..3u64).unwrap();
    flushed.notified().await;

    assert_eq!(handler.batches(), vec![vec![0, 1, 2]]);

    buffer.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn flush_on_stop_delivers_pending_items() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let buffer = AutoflushBuffer::new(
        BufferConfig {
            max_len: 1024,
            interval_ms: 60_000,
            flush_on_stop: true,
        },
        handler.clone(),
    );

    spawn_started(&buffer).await;

    for item in 0..4u64 {
        buffer.add(item).unwrap();
    }
    buffer.stop().await.unwrap();

    // The final flush completed before stop resolved.
    assert_eq!(handler.batches(), vec![vec![0, 1, 2, 3]]);
    assert_eq!(buffer.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn buffer_pause_parks_timer_flush_until_resume() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let buffer = AutoflushBuffer::new(
        BufferConfig {
            max_len: 1024,
            interval_ms: 50,
            flush_on_stop: false,
        },
        handler.clone(),
    );

    spawn_started(&buffer).await;

    let mut paused = buffer.notify_paused();
    buffer.pause().unwrap();
    paused.wait().await;
    assert_eq!(buffer.state(), LatchState::Paused);

    // The store keeps accepting items while the timer loop is parked.
    buffer.add_many(0..3u64).unwrap();
    sleep(Duration::from_millis(200)).await;
    assert!(handler.batches().is_empty());

    let flushed = handler.wait_for_total_items(3);
    buffer.resume().unwrap();
    flushed.notified().await;

    assert_eq!(handler.batches(), vec![vec![0, 1, 2]]);

    buffer.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn add_fails_before_start() {
    init_test_tracing();

    let buffer = AutoflushBuffer::new(BufferConfig::default(), RecordingHandler::<u64>::new());

    let err = buffer.add(1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueueClosed);
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_flush_runs_inline() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let buffer = AutoflushBuffer::new(
        BufferConfig {
            max_len: 1024,
            interval_ms: 60_000,
            flush_on_stop: false,
        },
        handler.clone(),
    );

    spawn_started(&buffer).await;

    buffer.add(1u64).unwrap();
    buffer.add(2).unwrap();
    buffer.flush().await;

    assert_eq!(handler.batches(), vec![vec![1, 2]]);

    buffer.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_triggers_never_share_an_item() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let buffer = AutoflushBuffer::new(
        BufferConfig {
            max_len: 10,
            interval_ms: 25,
            flush_on_stop: true,
        },
        handler.clone(),
    );

    spawn_started(&buffer).await;

    let flushed = handler.wait_for_total_items(400);

    // Four concurrent producers with random jitter, so size-triggered and
    // timer-triggered flushes genuinely interleave.
    let mut producers = Vec::new();
    for task in 0..4u64 {
        let buffer = buffer.clone();
        producers.push(tokio::spawn(async move {
            for item in 0..100u64 {
                buffer.add(task * 100 + item).unwrap();
                if rand::random::<u8>() < 32 {
                    sleep(Duration::from_millis(1)).await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    flushed.notified().await;

    let mut items: Vec<u64> = handler.batches().into_iter().flatten().collect();
    items.sort_unstable();
    assert_eq!(items, (0..400).collect::<Vec<_>>());

    buffer.stop().await.unwrap();
}
