use std::time::Duration;

use crew::config::{IntervalConfig, TriggerConfig};
use crew::interval::Interval;
use crew::latch::LatchState;
use crew::test_utils::actions::CountingTrigger;
use crew::test_utils::lifecycle::spawn_started;
use crew::trigger::AutoTrigger;
use telemetry::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn interval_fires_once_per_period() {
    init_test_tracing();

    let action = CountingTrigger::new();
    let interval = Interval::new(
        IntervalConfig {
            period_ms: 25,
            delay_ms: 0,
        },
        action.clone(),
    );

    spawn_started(&interval).await;

    action.wait_for_fires(3).notified().await;

    interval.stop().await.unwrap();
    assert_eq!(interval.state(), LatchState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn interval_delay_postpones_first_fire() {
    init_test_tracing();

    let action = CountingTrigger::new();
    let interval = Interval::new(
        IntervalConfig {
            period_ms: 25,
            delay_ms: 60_000,
        },
        action.clone(),
    );

    spawn_started(&interval).await;

    sleep(Duration::from_millis(100)).await;
    assert_eq!(action.fires(), 0);

    // Stop lands inside the delay, before the first tick ever ran.
    interval.stop().await.unwrap();
    assert_eq!(action.fires(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn interval_pause_suspends_fires() {
    init_test_tracing();

    let action = CountingTrigger::new();
    let interval = Interval::new(
        IntervalConfig {
            period_ms: 20,
            delay_ms: 0,
        },
        action.clone(),
    );

    spawn_started(&interval).await;
    action.wait_for_fires(1).notified().await;

    let mut paused = interval.notify_paused();
    interval.pause().unwrap();
    paused.wait().await;

    let fires_while_paused = action.fires();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(action.fires(), fires_while_paused);

    interval.resume().unwrap();
    action.wait_for_fires(fires_while_paused + 1).notified().await;

    interval.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_trigger_fires_at_max_count_and_resets() {
    init_test_tracing();

    let action = CountingTrigger::new();
    let trigger = AutoTrigger::new(
        TriggerConfig {
            max_count: 5,
            period_ms: None,
            trigger_on_stop: false,
        },
        action.clone(),
    );

    spawn_started(&trigger).await;

    for _ in 0..4 {
        trigger.increment().await;
    }
    assert_eq!(action.fires(), 0);
    assert_eq!(trigger.count(), 4);

    // The fifth increment crosses the threshold, fires inline, and resets.
    trigger.increment().await;
    assert_eq!(action.fires(), 1);
    assert_eq!(trigger.count(), 0);

    for _ in 0..5 {
        trigger.increment().await;
    }
    assert_eq!(action.fires(), 2);

    trigger.stop().await.unwrap();
    assert_eq!(action.fires(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_trigger_periodic_fire_leaves_counter_untouched() {
    init_test_tracing();

    let action = CountingTrigger::new();
    let trigger = AutoTrigger::new(
        TriggerConfig {
            max_count: 1024,
            period_ms: Some(25),
            trigger_on_stop: false,
        },
        action.clone(),
    );

    spawn_started(&trigger).await;

    trigger.increment().await;
    trigger.increment().await;
    trigger.increment().await;

    action.wait_for_fires(1).notified().await;
    assert_eq!(trigger.count(), 3);

    trigger.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_on_stop_fires_once_more() {
    init_test_tracing();

    let action = CountingTrigger::new();
    let trigger = AutoTrigger::new(
        TriggerConfig {
            max_count: 1024,
            period_ms: None,
            trigger_on_stop: true,
        },
        action.clone(),
    );

    spawn_started(&trigger).await;
    assert_eq!(action.fires(), 0);

    // The stop-time fire completes before stop resolves.
    trigger.stop().await.unwrap();
    assert_eq!(action.fires(), 1);
}
