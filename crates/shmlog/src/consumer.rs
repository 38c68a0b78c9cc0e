//! Consumer state and the two drain triggers.
//!
//! One [`LogConsumer`] exists per attached driver. It owns the read cursor,
//! the line scratch, and the rate limiter, and keeps the shared memory alive
//! for as long as anything can still call into it.
//!
//! The cooperative trigger ([`LogConsumer::on_call_returned`]) serializes on
//! the drain lock. The emergency trigger ([`LogConsumer::on_panic`]) never
//! touches the lock: a panic may be raised while the lock is held, and
//! getting the last lines out matters more than getting them out exactly
//! once. If both run at once they can emit a line twice or skip one; the
//! ring is only ever read, so that is the whole extent of the damage.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use shmlog_ring::{DrainStats, HeapRegion, LineBuffer, LogRing, RingError};

use crate::config::LINE_BUFFER_SIZE;
use crate::notify::{CallEvent, Event, NotifyResult, TriggerHook};
use crate::ratelimit::{Clock, MonotonicClock, RateLimiter};
use crate::sink::{LogSink, RateLimitedSink};

/// Result of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub stats: DrainStats,
    /// Lines refused by the rate limiter.
    pub dropped: u32,
}

/// Host-side reader of a shared log ring.
pub struct LogConsumer<C = MonotonicClock> {
    memory: Arc<HeapRegion>,
    ring: LogRing,
    /// Read position. Relaxed: the lock orders cooperative drains, and the
    /// emergency drain is allowed to race.
    cursor: AtomicU32,
    /// Held across a whole cooperative drain. Guards the shared scratch.
    drain_lock: Mutex<LineBuffer<LINE_BUFFER_SIZE>>,
    limiter: RateLimiter<C>,
    sink: Arc<dyn LogSink>,
    secure_version: Option<String>,
}

impl<C: Clock> LogConsumer<C> {
    /// Build a consumer over `memory`, starting at counter 0.
    pub fn new(memory: Arc<HeapRegion>, sink: Arc<dyn LogSink>, limiter: RateLimiter<C>) -> Self {
        // SAFETY: the consumer holds `memory` for as long as the ring is used.
        let ring = unsafe { LogRing::attach(memory.region()) };
        Self {
            memory,
            ring,
            cursor: AtomicU32::new(0),
            drain_lock: Mutex::new(LineBuffer::new()),
            limiter,
            sink,
            secure_version: None,
        }
    }

    /// Version string reported when the panic trigger fires.
    pub fn with_secure_version(mut self, version: Option<String>) -> Self {
        self.secure_version = version;
        self
    }

    #[inline]
    pub fn ring(&self) -> &LogRing {
        &self.ring
    }

    #[inline]
    pub fn memory(&self) -> &Arc<HeapRegion> {
        &self.memory
    }

    #[inline]
    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    /// Cooperative trigger: control just came back from the secure side.
    pub fn on_call_returned(&self) -> Result<DrainReport, RingError> {
        let mut line = self.drain_lock.lock();
        self.drain_with(&mut line)
    }

    /// Emergency trigger: the host is panicking. Does not take the lock.
    pub fn on_panic(&self) -> Result<DrainReport, RingError> {
        tracing::info!(
            "panic notifier - secure version {}",
            self.secure_version.as_deref().unwrap_or("unknown")
        );
        let mut line = LineBuffer::<LINE_BUFFER_SIZE>::new();
        self.drain_with(&mut line)
    }

    /// Entry point for the call notifier chain.
    pub fn on_call_notify(&self, event: CallEvent) -> NotifyResult {
        if event != CallEvent::Returned {
            return NotifyResult::Done;
        }
        let _ = self.on_call_returned();
        NotifyResult::Handled
    }

    fn drain_with<const N: usize>(
        &self,
        line: &mut LineBuffer<N>,
    ) -> Result<DrainReport, RingError> {
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        let mut sink = RateLimitedSink::new(&*self.sink, &self.limiter);

        let stats = match self.ring.reader().drain(&mut cursor, line, &mut sink) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "secure log ring misconfigured, drain skipped");
                return Err(e);
            }
        };
        self.cursor.store(cursor, Ordering::Relaxed);

        if stats.budget_exhausted {
            tracing::debug!(cursor, "secure log drain hit its step budget");
        }
        if stats.ahead_of_commit {
            tracing::debug!(cursor, "secure log cursor ahead of published data");
        }

        Ok(DrainReport {
            stats,
            dropped: sink.dropped(),
        })
    }
}

impl<C: Clock> TriggerHook for LogConsumer<C> {
    fn notify(&self, event: Event) -> NotifyResult {
        match event {
            Event::Call(call) => self.on_call_notify(call),
            Event::Panic => {
                let _ = self.on_panic();
                NotifyResult::Handled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Lines(parking_lot::Mutex<Vec<String>>);

    impl Lines {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl LogSink for Lines {
        fn line(&self, line: &[u8]) {
            self.0.lock().push(String::from_utf8_lossy(line).into_owned());
        }

        fn overflow(&self, skipped: u32) {
            self.0.lock().push(format!("<overflow {skipped}>"));
        }
    }

    fn consumer(sz: u32, burst: u32) -> (LogConsumer, Arc<Lines>) {
        let memory = Arc::new(HeapRegion::new_zeroed(4096));
        // SAFETY: nothing else touches the memory yet.
        unsafe { LogRing::init(memory.region(), sz) };
        let lines = Arc::new(Lines::default());
        let limiter = RateLimiter::new(Duration::from_secs(3600), burst);
        (LogConsumer::new(memory, lines.clone(), limiter), lines)
    }

    #[test]
    fn test_cursor_persists_across_drains() {
        let (consumer, lines) = consumer(64, 100);

        consumer.ring().writer().write(b"one\ntwo\n");
        let report = consumer.on_call_returned().unwrap();
        assert_eq!(report.stats.lines, 2);
        assert_eq!(lines.take(), ["one", "two"]);
        assert_eq!(consumer.cursor(), 8);

        consumer.ring().writer().write(b"three\n");
        consumer.on_call_returned().unwrap();
        assert_eq!(lines.take(), ["three"]);
        assert_eq!(consumer.cursor(), 14);
    }

    #[test]
    fn test_rate_limited_lines_are_not_retried() {
        let (consumer, lines) = consumer(64, 3);

        consumer.ring().writer().write(b"a\nb\nc\nd\ne\n");
        let report = consumer.on_call_returned().unwrap();
        assert_eq!(report.stats.lines, 5);
        assert_eq!(report.dropped, 2);
        assert_eq!(lines.take(), ["a", "b", "c"]);
        assert_eq!(consumer.cursor(), 10);

        // Quota is shared with the emergency path too.
        consumer.ring().writer().write(b"f\n");
        let report = consumer.on_panic().unwrap();
        assert_eq!(report.dropped, 1);
        assert!(lines.take().is_empty());
    }

    #[test]
    fn test_overflow_reported_once() {
        let (consumer, lines) = consumer(16, 100);
        consumer.ring().writer().write(b"0123456789abcdefghij");

        let report = consumer.on_call_returned().unwrap();
        assert_eq!(report.stats.overflows, 1);
        assert_eq!(lines.take(), ["<overflow 4>", "456789abcdefghij"]);
        assert_eq!(consumer.cursor(), 20);
    }

    #[test]
    fn test_unadopted_region_skips_drain() {
        let memory = Arc::new(HeapRegion::new_zeroed(4096));
        let lines = Arc::new(Lines::default());
        let consumer = LogConsumer::new(
            memory,
            lines.clone(),
            RateLimiter::new(Duration::from_secs(1), 10),
        );

        assert_eq!(
            consumer.on_call_returned(),
            Err(RingError::CapacityNotPowerOfTwo { sz: 0 })
        );
        // Reported every attempt, never fatal.
        assert!(consumer.on_panic().is_err());
        assert_eq!(consumer.cursor(), 0);
        assert!(lines.take().is_empty());
    }

    #[test]
    fn test_panic_drain_does_not_wait_for_lock() {
        let (consumer, lines) = consumer(64, 100);
        consumer.ring().writer().write(b"last words\n");

        let _held = consumer.drain_lock.lock();
        let report = consumer.on_panic().unwrap();
        assert_eq!(report.stats.lines, 1);
        assert_eq!(lines.take(), ["last words"]);
    }

    #[test]
    fn test_call_notify_only_drains_on_return() {
        let (consumer, lines) = consumer(64, 100);
        consumer.ring().writer().write(b"x\n");

        assert_eq!(
            consumer.notify(Event::Call(CallEvent::Entering)),
            NotifyResult::Done
        );
        assert!(lines.take().is_empty());

        assert_eq!(
            consumer.notify(Event::Call(CallEvent::Returned)),
            NotifyResult::Handled
        );
        assert_eq!(lines.take(), ["x"]);

        consumer.ring().writer().write(b"y\n");
        assert_eq!(consumer.notify(Event::Panic), NotifyResult::Handled);
        assert_eq!(lines.take(), ["y"]);
    }

    #[test]
    fn test_racing_triggers_stay_in_bounds() {
        let (consumer, _lines) = consumer(64, u32::MAX);
        let consumer = Arc::new(consumer);

        std::thread::scope(|s| {
            s.spawn(|| {
                let mut writer = consumer.ring().writer();
                for i in 0..2000 {
                    writer.write(format!("line {i}\n").as_bytes());
                }
            });
            s.spawn(|| {
                for _ in 0..500 {
                    let _ = consumer.on_call_returned();
                }
            });
            s.spawn(|| {
                for _ in 0..500 {
                    let _ = consumer.on_panic();
                }
            });
        });

        // Whatever the interleaving, a final cooperative drain catches up.
        consumer.on_call_returned().unwrap();
        assert_eq!(consumer.cursor(), consumer.ring().status().put);
    }
}
