//! Fixed-rate pacing for the Netbridge session loop.
//!
//! A game client calls `SessionLoop::tick` once per frame from its update
//! loop. Hosts without a frame loop of their own (headless bots, the demo,
//! tests) can use [`TickScheduler`] to get the same cadence:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.recv() => break,
//!         info = scheduler.wait_for_tick() => {
//!             let report = session.tick();
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! # Manual mode
//!
//! With `tick_rate_hz == 0` the scheduler never fires and
//! [`TickScheduler::wait_for_tick`] pends forever; the host ticks on its
//! own schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick fires late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickPolicy {
    /// Skip the missed ticks and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence; the next tick fires at its scheduled
    /// time even if that is immediately.
    Drop,
}

/// Tick scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Ticks per second. 0 = manual mode (the scheduler never fires).
    pub tick_rate_hz: u32,
    /// Late-tick handling.
    pub policy: TickPolicy,
    /// Fraction of the tick budget (0.0–1.0) above which a tick's work is
    /// logged as a warning. Default: 0.80.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    /// Highest supported rate.
    pub const MAX_TICK_RATE_HZ: u32 = 240;

    /// A config for `tick_rate_hz` with default policy and threshold.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values.
    ///
    /// - `tick_rate_hz` is capped at [`Self::MAX_TICK_RATE_HZ`].
    /// - `budget_warn_threshold` is clamped to `0.0..=1.0`; NaN becomes
    ///   the default.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz exceeds maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self.budget_warn_threshold = if self.budget_warn_threshold.is_nan() {
            Self::default().budget_warn_threshold
        } else {
            self.budget_warn_threshold.clamp(0.0, 1.0)
        };
        self
    }

    /// Duration of one tick, or `None` in manual mode.
    pub fn tick_duration(&self) -> Option<Duration> {
        if self.tick_rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz)))
        }
    }
}

// ---------------------------------------------------------------------------
// TickInfo
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// The fixed step (`1 / tick_rate_hz`).
    pub dt: Duration,
    /// The tick woke more than 10% of a step late.
    pub overrun: bool,
    /// Whole ticks skipped because of the overrun (`Skip` policy only).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-timestep scheduler.
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Option<Duration>,
    tick_count: u64,
    next_tick: Option<Instant>,
    /// Set when a tick fires, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    paused: bool,
    total_overruns: u64,
    last_utilization: f64,
}

impl TickScheduler {
    /// Creates a scheduler; the first tick is one step from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();
        let next_tick = tick_duration.map(|d| Instant::now() + d);

        match tick_duration {
            Some(d) => debug!(
                rate_hz = config.tick_rate_hz,
                budget_ms = d.as_secs_f64() * 1000.0,
                policy = ?config.policy,
                "tick scheduler created"
            ),
            None => debug!("tick scheduler created in manual mode"),
        }

        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick,
            tick_start: None,
            paused: false,
            total_overruns: 0,
            last_utilization: 0.0,
        }
    }

    /// A scheduler for `tick_rate_hz` with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits until the next tick is due.
    ///
    /// Pends forever in manual mode or while paused, so it is safe inside
    /// `tokio::select!`.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, step) = match (self.next_tick, self.tick_duration) {
            (Some(next), Some(step)) if !self.paused => (next, step),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > step / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped = (late_by.as_nanos() / step.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "tick overrun, skipping ahead"
                        );
                    }
                }
                now + step
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick overrun, keeping cadence"
                    );
                }
                next + step
            }
        });

        if overrun {
            self.total_overruns += 1;
        }
        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            dt: step,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the current tick's work and checks it against the
    /// budget. A no-op if no tick is in progress.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let Some(budget) = self.tick_duration else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        self.last_utilization = utilization;

        if utilization >= 1.0 {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "tick exceeded budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick approaching budget"
            );
        }
    }

    /// Stops ticks until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Resumes ticking; the next tick is one step from now, with no
    /// catch-up for the paused time.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            if let Some(step) = self.tick_duration {
                self.next_tick = Some(Instant::now() + step);
            }
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    /// Whether the scheduler is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the scheduler is in manual mode.
    pub fn is_manual(&self) -> bool {
        self.tick_duration.is_none()
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Ticks that fired late.
    pub fn total_overruns(&self) -> u64 {
        self.total_overruns
    }

    /// Fraction of the budget the last recorded tick used.
    pub fn last_utilization(&self) -> f64 {
        self.last_utilization
    }

    /// The validated configuration.
    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// The fixed step, or `None` in manual mode.
    pub fn tick_duration(&self) -> Option<Duration> {
        self.tick_duration
    }
}
