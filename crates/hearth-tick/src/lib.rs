//! Deadline-driven tick scheduler for Hearth rooms.
//!
//! A room's execution context keeps one [`TickScheduler`]. The scheduler
//! owns the deadline of the next tick; the room drains its mailbox until
//! the deadline is close ([`TickScheduler::due_within`]), waits for either
//! an event or the deadline ([`TickScheduler::wait_until_due`]), and then
//! calls [`TickScheduler::fire`] to run the tick.
//!
//! Deadlines advance by exactly one interval from the *previous deadline*,
//! not from the moment the tick ran, so small delays are caught up without
//! drift. When the loop falls more than `max_lag_ticks` intervals behind,
//! the schedule is re-synchronized to `now + interval` instead of bursting.
//!
//! ```ignore
//! loop {
//!     while !scheduler.due_within(GUARD) {
//!         match mailbox.try_recv() { Ok(ev) => handle(ev), Err(_) => break }
//!     }
//!     tokio::select! {
//!         biased;
//!         _ = scheduler.wait_until_due() => {
//!             if let Some(info) = scheduler.fire() {
//!                 logic.on_tick(info.elapsed_secs());
//!                 scheduler.record_tick_end();
//!             }
//!         }
//!         Some(ev) = mailbox.recv() => handle(ev),
//!     }
//! }
//! ```
//!
//! An interval of zero puts the scheduler in event-driven mode: it never
//! becomes due.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Full configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. `Duration::ZERO` = event-driven (tick never fires).
    pub interval: Duration,
    /// How many whole intervals the loop may fall behind before the
    /// schedule is re-synchronized to the current time.
    pub max_lag_ticks: u32,
    /// Budget warning threshold (0.0–1.0) as a fraction of the interval.
    pub budget_warn_threshold: f64,
    /// Budget critical threshold (0.0–1.0).
    pub budget_critical_threshold: f64,
    /// Enable per-tick execution-time metrics.
    pub metrics_enabled: bool,
    /// Random jitter (0–max µs) added to the first deadline so rooms
    /// created together do not tick in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            max_lag_ticks: 5,
            budget_warn_threshold: 0.80,
            budget_critical_threshold: 1.0,
            metrics_enabled: true,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    /// Shortest interval accepted (1 kHz).
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Create a config ticking every `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Create a config ticking `tick_rate_hz` times per second (0 = event-driven).
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        if tick_rate_hz == 0 {
            return Self::default();
        }
        Self::with_interval(Duration::from_secs_f64(1.0 / f64::from(tick_rate_hz)))
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// - non-zero intervals are raised to [`Self::MIN_INTERVAL`];
    /// - thresholds are clamped to `0.0..=1.0` with warn ≤ critical;
    /// - `max_lag_ticks` is at least 1.
    pub fn validated(mut self) -> Self {
        if !self.interval.is_zero() && self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_us = self.interval.as_micros() as u64,
                "tick interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.max_lag_ticks = self.max_lag_ticks.max(1);
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self.budget_critical_threshold = self.budget_critical_threshold.clamp(0.0, 1.0);
        if self.budget_warn_threshold > self.budget_critical_threshold {
            self.budget_warn_threshold = self.budget_critical_threshold;
        }
        self
    }

    /// The tick interval, or `None` in event-driven mode.
    pub fn tick_interval(&self) -> Option<Duration> {
        if self.interval.is_zero() {
            None
        } else {
            Some(self.interval)
        }
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Information about a fired tick.
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// Wall time since the previous tick fired (or since the schedule
    /// started, for the first tick).
    pub elapsed: Duration,
    /// `true` if the tick fired more than 10% of an interval late.
    pub late: bool,
    /// Intervals dropped by a re-synchronization (0 in normal operation).
    pub ticks_skipped: u64,
}

impl TickInfo {
    /// Elapsed time in seconds, the unit room callbacks receive.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for the tick scheduler.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    /// Total ticks fired.
    pub total_ticks: u64,
    /// Ticks that fired late.
    pub total_late: u64,
    /// Intervals dropped by re-synchronization.
    pub total_skipped: u64,
    /// Exponential moving average of tick execution time (α = 0.1).
    pub avg_tick_time: Duration,
    /// Maximum tick execution time observed.
    pub max_tick_time: Duration,
    /// Last budget utilization (>1.0 means the tick overran its interval).
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Deadline-driven tick scheduler. One per room.
pub struct TickScheduler {
    config: TickConfig,
    interval: Option<Duration>,
    tick_count: u64,
    /// When the next tick is due.
    deadline: Option<TokioInstant>,
    /// When the previous tick fired; the base for `TickInfo::elapsed`.
    last_fire: TokioInstant,
    /// Wall-clock start of the current tick's callback, consumed by
    /// `record_tick_end`.
    tick_start: Option<Instant>,
    paused: bool,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Create a scheduler whose first deadline is one interval (plus jitter)
    /// from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let interval = config.tick_interval();
        let now = TokioInstant::now();

        let deadline = interval.map(|d| {
            let jitter = if config.initial_jitter_us > 0 {
                Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
            } else {
                Duration::ZERO
            };
            now + d + jitter
        });

        match interval {
            None => debug!("tick scheduler created in event-driven mode"),
            Some(d) => debug!(
                interval_ms = d.as_secs_f64() * 1000.0,
                max_lag_ticks = config.max_lag_ticks,
                "tick scheduler created"
            ),
        }

        Self {
            config,
            interval,
            tick_count: 0,
            deadline,
            last_fire: now,
            tick_start: None,
            paused: false,
            metrics: TickMetrics::default(),
        }
    }

    /// Create a scheduler for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Deadline of the next tick, if ticking.
    pub fn deadline(&self) -> Option<TokioInstant> {
        if self.paused { None } else { self.deadline }
    }

    /// Whether the next deadline falls within `guard` from now.
    ///
    /// Always `false` while paused or in event-driven mode.
    pub fn due_within(&self, guard: Duration) -> bool {
        self.deadline()
            .is_some_and(|deadline| TokioInstant::now() + guard >= deadline)
    }

    /// Resolves once the deadline has passed.
    ///
    /// Pends forever while paused or in event-driven mode, so it can sit in
    /// a `tokio::select!` next to the mailbox.
    pub async fn wait_until_due(&self) {
        match self.deadline() {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Fire the due tick and schedule the next one.
    ///
    /// Returns `None` when paused or event-driven. The next deadline is the
    /// previous deadline plus one interval, unless the loop is more than
    /// `max_lag_ticks` behind, in which case it restarts from now.
    pub fn fire(&mut self) -> Option<TickInfo> {
        let (Some(deadline), Some(interval)) = (self.deadline(), self.interval) else {
            return None;
        };

        let now = TokioInstant::now();
        let elapsed = now.saturating_duration_since(self.last_fire);
        self.last_fire = now;
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(deadline);
        let late = late_by > interval / 10;
        let behind = (late_by.as_nanos() / interval.as_nanos()) as u64;

        let mut ticks_skipped = 0;
        let next = if behind > u64::from(self.config.max_lag_ticks) {
            ticks_skipped = behind;
            warn!(
                tick = self.tick_count,
                behind,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "tick loop fell behind, re-synchronizing"
            );
            now + interval
        } else {
            deadline + interval
        };
        self.deadline = Some(next);

        if late {
            self.metrics.total_late += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, late, "tick fired");

        Some(TickInfo {
            tick: self.tick_count,
            elapsed,
            late,
            ticks_skipped,
        })
    }

    /// Wait for the deadline and fire. Pends forever when not ticking.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        loop {
            self.wait_until_due().await;
            if let Some(info) = self.fire() {
                return info;
            }
        }
    }

    /// Record that the tick callback finished, for budget monitoring.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if let Some(budget) = self.interval {
            let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
            self.metrics.budget_utilization = utilization;

            if utilization >= self.config.budget_critical_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    budget_ms = budget.as_secs_f64() * 1000.0,
                    "tick exceeded its interval"
                );
            } else if utilization >= self.config.budget_warn_threshold {
                debug!(
                    tick = self.tick_count,
                    utilization_pct = format!("{:.1}", utilization * 100.0),
                    "tick approaching budget limit"
                );
            }
        }

        if self.config.metrics_enabled {
            if elapsed > self.metrics.max_tick_time {
                self.metrics.max_tick_time = elapsed;
            }
            let alpha = 0.1;
            let prev = self.metrics.avg_tick_time.as_secs_f64();
            self.metrics.avg_tick_time =
                Duration::from_secs_f64(prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha);
        }
    }

    /// Stop ticking until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Resume ticking; the next deadline is one interval from now.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            let now = TokioInstant::now();
            self.last_fire = now;
            if let Some(interval) = self.interval {
                self.deadline = Some(now + interval);
            }
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_event_driven(&self) -> bool {
        self.interval.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// The tick interval, or `None` in event-driven mode.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}
