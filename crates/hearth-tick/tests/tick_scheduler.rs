//! Integration tests for the deadline-driven tick scheduler.
//!
//! Uses `tokio::time::pause()` to control time deterministically.
//! With paused time, `sleep_until` resolves as soon as the runtime is idle,
//! so deadlines are hit exactly unless the test advances the clock past them.

use std::time::Duration;

use hearth_tick::{TickConfig, TickScheduler};
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

fn config_20hz() -> TickConfig {
    TickConfig {
        initial_jitter_us: 0,
        ..TickConfig::with_rate(20)
    }
}

fn config_event_driven() -> TickConfig {
    TickConfig::with_rate(0)
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_event_driven() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.interval, Duration::ZERO);
    assert_eq!(cfg.tick_interval(), None);
}

#[test]
fn test_with_rate_sets_interval() {
    let cfg = TickConfig::with_rate(20);
    assert_eq!(cfg.tick_interval(), Some(Duration::from_millis(50)));
}

#[test]
fn test_validated_clamps_tiny_interval_and_thresholds() {
    let cfg = TickConfig {
        interval: Duration::from_micros(10),
        max_lag_ticks: 0,
        budget_warn_threshold: 1.5,
        budget_critical_threshold: 0.5,
        ..TickConfig::default()
    }
    .validated();

    assert_eq!(cfg.interval, TickConfig::MIN_INTERVAL);
    assert_eq!(cfg.max_lag_ticks, 1);
    assert_eq!(cfg.budget_critical_threshold, 0.5);
    assert_eq!(cfg.budget_warn_threshold, 0.5);
}

// =========================================================================
// Scheduler creation and accessors
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduler_initial_state() {
    let s = TickScheduler::new(config_20hz());
    assert_eq!(s.tick_count(), 0);
    assert!(!s.is_event_driven());
    assert!(!s.is_paused());
    assert_eq!(s.interval(), Some(Duration::from_millis(50)));
    assert_eq!(s.deadline(), Some(Instant::now() + Duration::from_millis(50)));
}

#[tokio::test(start_paused = true)]
async fn test_event_driven_has_no_deadline() {
    let s = TickScheduler::new(config_event_driven());
    assert!(s.is_event_driven());
    assert_eq!(s.deadline(), None);
    assert!(!s.due_within(Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_due_within_guard_band() {
    let s = TickScheduler::new(config_20hz());
    assert!(!s.due_within(Duration::from_millis(2)));

    tokio::time::advance(Duration::from_millis(48)).await;
    assert!(s.due_within(Duration::from_millis(2)));
}

// =========================================================================
// Tick firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_and_increments() {
    let mut s = TickScheduler::new(config_20hz());

    let info = s.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert_eq!(info.elapsed, Duration::from_millis(50));
    assert!(!info.late);
    assert_eq!(info.ticks_skipped, 0);
    assert_eq!(s.tick_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_secs_matches_interval() {
    let mut s = TickScheduler::new(config_20hz());
    for _ in 0..3 {
        let info = s.wait_for_tick().await;
        assert!((info.elapsed_secs() - 0.05).abs() < 1e-9);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fire_in_event_driven_mode_returns_none() {
    let mut s = TickScheduler::new(config_event_driven());
    assert!(s.fire().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_advances_from_previous_deadline() {
    let start = Instant::now();
    let mut s = TickScheduler::new(config_20hz());

    // Fall 70ms behind the first deadline: within the lag allowance.
    tokio::time::advance(Duration::from_millis(120)).await;
    let info = s.fire().unwrap();
    assert!(info.late);
    assert_eq!(info.ticks_skipped, 0);

    // Next deadline stays on the 50ms grid, not now + 50ms.
    assert_eq!(s.deadline(), Some(start + Duration::from_millis(100)));

    // The overdue tick fires immediately and the grid holds.
    s.wait_until_due().await;
    s.fire().unwrap();
    assert_eq!(s.deadline(), Some(start + Duration::from_millis(150)));
}

#[tokio::test(start_paused = true)]
async fn test_large_lag_resynchronizes_to_now() {
    let mut s = TickScheduler::new(config_20hz());

    tokio::time::advance(Duration::from_secs(1)).await;
    let now = Instant::now();
    let info = s.fire().unwrap();

    assert!(info.late);
    assert_eq!(info.ticks_skipped, 19);
    assert_eq!(s.deadline(), Some(now + Duration::from_millis(50)));
    assert_eq!(s.metrics().total_skipped, 19);
}

// =========================================================================
// Event-driven mode pends forever
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_event_driven_never_fires() {
    let mut s = TickScheduler::new(config_event_driven());

    let result = tokio::time::timeout(Duration::from_secs(5), s.wait_for_tick()).await;
    assert!(result.is_err(), "event-driven scheduler should pend forever");
}

// =========================================================================
// Pause / Resume
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_prevents_ticks() {
    let mut s = TickScheduler::new(config_20hz());

    s.wait_for_tick().await;
    assert_eq!(s.tick_count(), 1);

    s.pause();
    assert!(s.is_paused());
    assert!(s.fire().is_none());

    let result = tokio::time::timeout(Duration::from_secs(1), s.wait_for_tick()).await;
    assert!(result.is_err(), "paused scheduler should pend");
}

#[tokio::test(start_paused = true)]
async fn test_resume_schedules_one_interval_from_now() {
    let mut s = TickScheduler::new(config_20hz());
    s.pause();

    tokio::time::advance(Duration::from_secs(3)).await;
    s.resume();
    assert_eq!(s.deadline(), Some(Instant::now() + Duration::from_millis(50)));

    let info = s.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert_eq!(info.elapsed, Duration::from_millis(50));
    assert_eq!(info.ticks_skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_idempotent() {
    let mut s = TickScheduler::new(config_20hz());

    s.pause();
    s.pause();
    assert!(s.is_paused());

    s.resume();
    s.resume();
    assert!(!s.is_paused());
}

// =========================================================================
// Metrics
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_initial_metrics_are_zero() {
    let s = TickScheduler::new(config_20hz());
    let m = s.metrics();
    assert_eq!(m.total_ticks, 0);
    assert_eq!(m.total_late, 0);
    assert_eq!(m.total_skipped, 0);
    assert_eq!(m.avg_tick_time, Duration::ZERO);
    assert_eq!(m.max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_total_ticks_increments() {
    let mut s = TickScheduler::new(config_20hz());

    for _ in 0..3 {
        s.wait_for_tick().await;
        s.record_tick_end();
    }

    assert_eq!(s.metrics().total_ticks, 3);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_fire_is_noop() {
    let mut s = TickScheduler::new(config_20hz());
    s.record_tick_end();
    assert_eq!(s.metrics().total_ticks, 0);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_max_tick_time_tracked() {
    let mut s = TickScheduler::new(config_20hz());

    // record_tick_end measures wall-clock time, not tokio time.
    s.wait_for_tick().await;
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    assert!(s.metrics().max_tick_time > Duration::ZERO);
    let util = s.metrics().budget_utilization;
    assert!(util > 0.0 && util < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_disabled_skips_avg_update() {
    let mut s = TickScheduler::new(TickConfig {
        metrics_enabled: false,
        ..config_20hz()
    });

    s.wait_for_tick().await;
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    assert_eq!(s.metrics().avg_tick_time, Duration::ZERO);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

// =========================================================================
// Integration: drain-then-select loop (mirrors room usage)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_pattern() {
    let mut s = TickScheduler::new(config_20hz());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<&str>();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send("hello").ok();
        tokio::time::sleep(Duration::from_millis(140)).await;
        tx.send("stop").ok();
    });

    enum Step {
        Tick,
        Event(Option<&'static str>),
    }

    let mut ticks_fired = 0u64;
    let mut events = Vec::new();
    let mut stopped = false;
    while !stopped {
        while !s.due_within(Duration::from_millis(2)) {
            match rx.try_recv() {
                Ok("stop") => {
                    stopped = true;
                    break;
                }
                Ok(ev) => events.push(ev),
                Err(_) => break,
            }
        }
        if stopped {
            break;
        }

        let step = tokio::select! {
            biased;
            _ = s.wait_until_due() => Step::Tick,
            ev = rx.recv() => Step::Event(ev),
        };
        match step {
            Step::Tick => {
                if let Some(info) = s.fire() {
                    ticks_fired += 1;
                    assert_eq!(info.tick, ticks_fired);
                    s.record_tick_end();
                }
            }
            Step::Event(Some("stop")) | Step::Event(None) => stopped = true,
            Step::Event(Some(ev)) => events.push(ev),
        }
    }

    assert_eq!(events, vec!["hello"]);
    assert_eq!(ticks_fired, 3);
}
