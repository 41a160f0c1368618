use std::sync::Mutex;
use std::time::Duration;

/// Source of waiting. Production code sleeps the thread; tests advance a virtual clock.
pub trait Clock: Send + Sync {
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Fixed-count, fixed-interval polling bound. No backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest time `retry` can spend sleeping under this policy.
    pub fn window(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Wait for the launcher process to grow a child worker.
pub const DISCOVERY: RetryPolicy = RetryPolicy::new(Duration::from_secs(1), 30);
/// Wait for a signalled worker to exit.
pub const STOP_CONFIRM: RetryPolicy = RetryPolicy::new(Duration::from_secs(1), 10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gave up after {attempts} attempts")]
pub struct TimedOut {
    pub attempts: u32,
}

/// Run `probe` up to `policy.max_attempts` times, sleeping `policy.interval` after each miss.
///
/// The probe receives the 1-based attempt number.
pub fn retry<T>(
    clock: &dyn Clock,
    policy: RetryPolicy,
    mut probe: impl FnMut(u32) -> Option<T>,
) -> Result<T, TimedOut> {
    for attempt in 1..=policy.max_attempts {
        if let Some(v) = probe(attempt) {
            return Ok(v);
        }
        clock.sleep(policy.interval);
    }
    Err(TimedOut {
        attempts: policy.max_attempts,
    })
}

/// Virtual clock: sleeping only adds to a counter.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Clock for ManualClock {
    fn sleep(&self, d: Duration) {
        let mut g = self.elapsed.lock().unwrap_or_else(|p| p.into_inner());
        *g += d;
    }
}
