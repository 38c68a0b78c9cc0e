//! Windowed rate limiting for forwarded lines.
//!
//! Both drain triggers share one limiter, and the emergency trigger runs
//! without the drain lock, so all state is atomics. Under a race the count
//! is approximate: a window may let a few extra lines through or roll over
//! twice. It never blocks and never panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since some fixed origin.
    fn now(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// [`Clock`] backed by [`Instant`].
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
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// No window has started yet.
const WINDOW_UNSET: u64 = u64::MAX;

/// Allows up to `burst` calls per `window`.
pub struct RateLimiter<C = MonotonicClock> {
    clock: C,
    window: Duration,
    burst: u32,
    /// Start of the current window, in nanoseconds on `clock`.
    window_start: AtomicU64,
    /// Calls allowed in the current window.
    passed: AtomicU32,
    /// Calls refused in the current window.
    missed: AtomicU32,
}

impl RateLimiter<MonotonicClock> {
    pub fn new(window: Duration, burst: u32) -> Self {
        Self::with_clock(MonotonicClock::new(), window, burst)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(clock: C, window: Duration, burst: u32) -> Self {
        Self {
            clock,
            window,
            burst,
            window_start: AtomicU64::new(WINDOW_UNSET),
            passed: AtomicU32::new(0),
            missed: AtomicU32::new(0),
        }
    }

    /// Take one token. Returns false once the window's quota is spent.
    pub fn allow(&self) -> bool {
        let now = duration_nanos(self.clock.now());
        let start = self.window_start.load(Ordering::Relaxed);

        if start == WINDOW_UNSET || now.saturating_sub(start) >= duration_nanos(self.window) {
            // Whoever wins the exchange opens the new window.
            if self
                .window_start
                .compare_exchange(start, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                let missed = self.missed.swap(0, Ordering::Relaxed);
                self.passed.store(0, Ordering::Relaxed);
                if missed > 0 {
                    tracing::warn!(missed, "secure log lines suppressed");
                }
            }
        }

        let burst = self.burst;
        let taken = self
            .passed
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |passed| {
                (passed < burst).then_some(passed + 1)
            })
            .is_ok();

        if !taken {
            let _ = self
                .missed
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |m| {
                    Some(m.saturating_add(1))
                });
        }
        taken
    }

    /// Calls refused so far in the current window.
    pub fn suppressed(&self) -> u32 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Tokens left in the current window. A window that has already
    /// elapsed still reports what it had left; the next `allow` resets it.
    pub fn remaining(&self) -> u32 {
        self.burst
            .saturating_sub(self.passed.load(Ordering::Relaxed))
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestClock(Mutex<Duration>);

    impl TestClock {
        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Duration {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn test_quota_per_window() {
        let clock = Arc::new(TestClock::default());
        let limiter = RateLimiter::with_clock(clock.clone(), Duration::from_secs(1), 100);

        let allowed = (0..150).filter(|_| limiter.allow()).count();
        assert_eq!(allowed, 100);
        assert_eq!(limiter.suppressed(), 50);
        assert_eq!(limiter.remaining(), 0);

        clock.advance(Duration::from_millis(999));
        assert!(!limiter.allow());

        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow());
        assert_eq!(limiter.suppressed(), 0);
        assert_eq!(limiter.remaining(), 99);
    }

    #[test]
    fn test_window_starts_at_first_call() {
        let clock = Arc::new(TestClock::default());
        clock.advance(Duration::from_secs(10));
        let limiter = RateLimiter::with_clock(clock.clone(), Duration::from_secs(1), 2);

        assert!(limiter.allow());
        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow());
        assert!(!limiter.allow());

        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow());
    }

    #[test]
    fn test_zero_burst_refuses_everything() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 0);
        assert!(!limiter.allow());
        assert!(!limiter.allow());
        assert_eq!(limiter.suppressed(), 2);
    }

    #[test]
    fn test_concurrent_callers_never_exceed_quota() {
        let clock = Arc::new(TestClock::default());
        let limiter = Arc::new(RateLimiter::with_clock(
            clock.clone(),
            Duration::from_secs(1),
            100,
        ));
        // Open the window up front; only the rollover itself is racy.
        assert!(limiter.allow());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..100).filter(|_| limiter.allow()).count())
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // The clock never moves, so there is exactly one window.
        assert_eq!(allowed, 99);
        assert_eq!(limiter.suppressed(), 301);
    }
}
