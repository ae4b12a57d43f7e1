//! Fixed-period loop around [`UpdateScheduler::tick`].
//!
//! The loop sleeps `tick_period` after every tick, and additionally
//! `not_ready_backoff` after a tick that stopped at the readiness gate.
//! Any tick error ends the loop and is handed back to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tagfuse_perception::PoseEstimator;
use tagfuse_types::FusionError;
use tracing::{debug, info};

use crate::scheduler::{TickOutcome, UpdateScheduler};

/// Default pause between ticks.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);
/// Default extra pause after a not-ready tick.
pub const DEFAULT_NOT_READY_BACKOFF: Duration = Duration::from_millis(1000);

/// Longest uninterrupted sleep; bounds how long a shutdown request waits.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub tick_period: Duration,
    pub not_ready_backoff: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            not_ready_backoff: DEFAULT_NOT_READY_BACKOFF,
        }
    }
}

/// Counters returned when the loop stops cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub published: u64,
    pub not_ready: u64,
}

/// Tick `scheduler` until `shutdown` is set.
///
/// # Errors
///
/// Returns the first error produced by a tick; the loop does not retry.
pub fn run_loop<E: PoseEstimator>(
    scheduler: &mut UpdateScheduler<E>,
    timing: LoopTiming,
    shutdown: &AtomicBool,
) -> Result<LoopSummary, FusionError> {
    let mut summary = LoopSummary::default();
    let mut last_reason = String::new();

    while !shutdown.load(Ordering::SeqCst) {
        summary.ticks += 1;
        match scheduler.tick()? {
            TickOutcome::Published(estimate) => {
                summary.published += 1;
                if !last_reason.is_empty() {
                    info!(sequence = estimate.sequence, "estimator ready; publishing");
                    last_reason.clear();
                }
            }
            TickOutcome::NotReady(readiness) => {
                summary.not_ready += 1;
                let reason = readiness.to_string();
                if reason != last_reason {
                    info!(%reason, backoff_ms = timing.not_ready_backoff.as_millis() as u64, "not ready");
                    last_reason = reason;
                }
                pause(timing.not_ready_backoff, shutdown);
            }
        }
        pause(timing.tick_period, shutdown);
    }

    debug!(?summary, "update loop stopped");
    Ok(summary)
}

/// Sleep for `duration`, waking early once `shutdown` is set.
fn pause(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, prior};
    use tagfuse_types::EstimationError;

    fn fast() -> LoopTiming {
        LoopTiming {
            tick_period: Duration::ZERO,
            not_ready_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn already_stopped_loop_does_not_tick() {
        let mut h = Harness::new(&[]);
        let shutdown = AtomicBool::new(true);
        let summary = run_loop(&mut h.scheduler, fast(), &shutdown).unwrap();
        assert_eq!(summary, LoopSummary::default());
        assert_eq!(h.scheduler.ticks(), 0);
    }

    #[test]
    fn estimation_failure_stops_the_loop() {
        let mut h = Harness::new(&[]);
        h.config.borrow_mut().prior = Some(prior(0));
        h.fail_optimize.set(true);
        let shutdown = AtomicBool::new(false);
        let err = run_loop(&mut h.scheduler, fast(), &shutdown).unwrap_err();
        assert!(matches!(err, FusionError::Estimation(EstimationError::Diverged { .. })));
        assert_eq!(h.scheduler.ticks(), 1);
    }

    #[test]
    fn pause_returns_early_on_shutdown() {
        let shutdown = AtomicBool::new(true);
        let started = Instant::now();
        pause(Duration::from_secs(5), &shutdown);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn pause_waits_out_short_durations() {
        let shutdown = AtomicBool::new(false);
        let started = Instant::now();
        pause(Duration::from_millis(20), &shutdown);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn default_timing_matches_node_cadence() {
        let t = LoopTiming::default();
        assert_eq!(t.tick_period, Duration::from_millis(10));
        assert_eq!(t.not_ready_backoff, Duration::from_millis(1000));
    }
}
