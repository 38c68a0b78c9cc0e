//! Forward a secure environment's log output into the host's logging.
//!
//! The secure side writes text into a shared-memory ring
//! ([`shmlog_ring`]) and never waits for the host. This crate is the host
//! half: it sets the ring up with the secure side ([`LogDriver`]), drains it
//! when a call into the secure side returns or when the host panics
//! ([`LogConsumer`]), and hands lines to a [`LogSink`] at a bounded rate
//! ([`RateLimiter`]).
//!
//! ```text
//! secure side ──writes──▶ shared ring ──drain──▶ rate limiter ──▶ LogSink
//!                                         ▲
//!                    call returned (locked) │ panic (unlocked)
//! ```

pub mod config;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod notify;
pub mod ratelimit;
pub mod secure;
pub mod sink;

pub use config::DriverConfig;
pub use consumer::{DrainReport, LogConsumer};
pub use driver::{DetachReport, LogDriver};
pub use error::AttachError;
pub use notify::{
    CallEvent, Event, NotifyError, NotifyResult, Notifications, Subscription, Trigger, TriggerHook,
};
pub use ratelimit::{Clock, MonotonicClock, RateLimiter};
pub use secure::{ConsoleCtl, SecureError, SecureSide, SharedMemId};
pub use sink::{LogSink, RateLimitedSink, TracingSink};

pub use shmlog_ring;
pub use shmlog_ring::{DrainStats, RingError};
