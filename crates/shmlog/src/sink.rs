//! Where forwarded lines end up.

use shmlog_ring::LineSink;

use crate::ratelimit::{Clock, RateLimiter};

/// Tracing target for lines forwarded from the secure side.
pub const SECURE_LOG_TARGET: &str = "shmlog::secure";

/// Line-oriented destination for secure-side output.
///
/// Called from both drain triggers, possibly at the same time, so
/// implementations take `&self`. They should not block for long; the rate
/// limiter in front of them bounds how often they are called, not how long
/// each call takes.
pub trait LogSink: Send + Sync {
    /// One line, without trailing newline. Not guaranteed to be UTF-8.
    fn line(&self, line: &[u8]);

    /// Data was lost to the producer overwriting it.
    fn overflow(&self, skipped: u32);
}

/// Forwards lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn line(&self, line: &[u8]) {
        tracing::info!(target: SECURE_LOG_TARGET, "{}", String::from_utf8_lossy(line));
    }

    fn overflow(&self, skipped: u32) {
        tracing::error!(target: SECURE_LOG_TARGET, skipped, "log overflow");
    }
}

/// Puts a [`RateLimiter`] in front of a [`LogSink`] for one drain.
///
/// Refused lines are dropped, not queued. Overflow reports bypass the
/// limiter.
pub struct RateLimitedSink<'a, C: Clock> {
    sink: &'a dyn LogSink,
    limiter: &'a RateLimiter<C>,
    dropped: u32,
}

impl<'a, C: Clock> RateLimitedSink<'a, C> {
    pub fn new(sink: &'a dyn LogSink, limiter: &'a RateLimiter<C>) -> Self {
        Self {
            sink,
            limiter,
            dropped: 0,
        }
    }

    /// Lines refused by the limiter during this drain.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl<C: Clock> LineSink for RateLimitedSink<'_, C> {
    fn line(&mut self, line: &[u8]) {
        if self.limiter.allow() {
            self.sink.line(line);
        } else {
            self.dropped += 1;
        }
    }

    fn overflow(&mut self, skipped: u32) {
        self.sink.overflow(skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_tracing_sink_forwards_lines() {
        let logged = capture(|| {
            TracingSink.line(b"secure boot ok");
            TracingSink.line(b"bad \xff byte");
            TracingSink.overflow(12);
        });

        assert!(logged.contains("INFO shmlog::secure: secure boot ok"), "{logged}");
        assert!(logged.contains("bad \u{fffd} byte"), "{logged}");
        assert!(logged.contains("ERROR shmlog::secure: log overflow skipped=12"), "{logged}");
    }

    #[derive(Default)]
    struct Counting {
        lines: Mutex<u32>,
        overflows: Mutex<u32>,
    }

    impl LogSink for Counting {
        fn line(&self, _line: &[u8]) {
            *self.lines.lock() += 1;
        }

        fn overflow(&self, _skipped: u32) {
            *self.overflows.lock() += 1;
        }
    }

    #[test]
    fn test_rate_limited_sink_drops_and_counts() {
        let inner = Counting::default();
        let limiter = RateLimiter::new(Duration::from_secs(3600), 2);
        let mut sink = RateLimitedSink::new(&inner, &limiter);

        for _ in 0..5 {
            sink.line(b"x");
        }
        sink.overflow(3);
        sink.overflow(3);

        assert_eq!(*inner.lines.lock(), 2);
        assert_eq!(sink.dropped(), 3);
        assert_eq!(*inner.overflows.lock(), 2);
    }
}
