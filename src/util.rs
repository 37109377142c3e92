//! Small shared helpers: the monotonic time source, log rate limiting and lock access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time measured from a fixed origin.
///
/// Every component of a session shares one clock so arrival times, frame
/// timestamps and health checks are directly comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

const NEVER: u64 = u64::MAX;

/// Lets one event through per interval and counts the ones it swallowed.
///
/// Shared between threads; the timestamps are supplied by the caller.
pub struct RateLimiter {
    interval_us: u64,
    last_us: AtomicU64,
    suppressed: AtomicU64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_us: interval.as_micros() as u64,
            last_us: AtomicU64::new(NEVER),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(suppressed)` when the event may be logged, with the number
    /// of events dropped since the last one that got through.
    pub fn check(&self, now_us: u64) -> Option<u64> {
        let last = self.last_us.load(Ordering::Relaxed);
        if last != NEVER && now_us.saturating_sub(last) < self.interval_us {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if self
            .last_us
            .compare_exchange(last, now_us, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        Some(self.suppressed.swap(0, Ordering::Relaxed))
    }
}

/// Locks a mutex, recovering the data if another thread panicked while holding it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
