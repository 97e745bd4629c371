//! Readiness gate: a bounded poll of the primary service's health.

use crate::config::ServiceConfig;
use crate::error::{Result, StackError};
use crate::inspect::Inspector;
use crate::runtime::Health;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Process-wide cancellation flag, flipped by the signal listener.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Sleep for `duration`. Returns `false` if cancelled before it elapsed.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    const SLICE: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Self::SLICE));
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessOutcome {
    Ready,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessResult {
    pub service: String,
    pub outcome: ReadinessOutcome,
    pub elapsed_seconds: f64,
    pub last_health: Health,
    pub polls: u32,
}

impl ReadinessResult {
    pub fn is_ready(&self) -> bool {
        self.outcome == ReadinessOutcome::Ready
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl GateSettings {
    pub fn from_secs(poll_interval: u64, timeout: u64) -> Self {
        Self {
            poll_interval: Duration::from_secs(poll_interval.max(1)),
            timeout: Duration::from_secs(timeout),
        }
    }
}

// ---------------------------------------------------------------------------
// await_ready
// ---------------------------------------------------------------------------

/// Poll `service` until it reports `healthy` or `settings.timeout` elapses.
///
/// The last sleep is shortened so the final poll lands on the timeout. A
/// poll whose sleep plus query time (measured on the previous poll) would
/// end past `timeout + poll_interval` is not started; the gate reports
/// `TimedOut` instead. Cancellation ends the poll with
/// [`StackError::Interrupted`].
pub fn await_ready(
    inspector: &Inspector<'_>,
    service: &ServiceConfig,
    settings: GateSettings,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> Result<ReadinessResult> {
    let start = clock.now();
    let bound = settings.timeout + settings.poll_interval;
    let mut polls = 0u32;

    tracing::info!(
        service = %service.name,
        interval_secs = settings.poll_interval.as_secs(),
        timeout_secs = settings.timeout.as_secs(),
        "waiting for service to become healthy"
    );

    loop {
        if cancel.is_cancelled() {
            tracing::warn!(service = %service.name, polls, "readiness wait interrupted");
            return Err(StackError::Interrupted);
        }

        let polled_at = clock.now();
        let observation = inspector.observe(service);
        polls += 1;
        let now = clock.now();
        let query_time = now.saturating_sub(polled_at);
        let elapsed = now.saturating_sub(start);
        let pause = settings
            .poll_interval
            .min(settings.timeout.saturating_sub(elapsed));

        let outcome = if observation.health == Health::Healthy {
            Some(ReadinessOutcome::Ready)
        } else if elapsed >= settings.timeout || elapsed + pause + query_time > bound {
            Some(ReadinessOutcome::TimedOut)
        } else {
            None
        };

        if let Some(outcome) = outcome {
            let result = ReadinessResult {
                service: service.name.clone(),
                outcome,
                elapsed_seconds: elapsed.as_secs_f64(),
                last_health: observation.health,
                polls,
            };
            match outcome {
                ReadinessOutcome::Ready => {
                    tracing::info!(service = %service.name, elapsed_secs = result.elapsed_seconds, "service is healthy")
                }
                ReadinessOutcome::TimedOut => {
                    tracing::warn!(service = %service.name, elapsed_secs = result.elapsed_seconds, health = %observation.health, "readiness timed out")
                }
            }
            return Ok(result);
        }

        tracing::debug!(
            service = %service.name,
            status = %observation.runtime_status,
            health = %observation.health,
            elapsed_secs = elapsed.as_secs(),
            "not ready yet"
        );

        if !clock.sleep(pause, cancel) {
            tracing::warn!(service = %service.name, polls, "readiness wait interrupted");
            return Err(StackError::Interrupted);
        }
    }
}
