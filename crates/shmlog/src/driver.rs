//! Driver lifecycle: attach, detach, shutdown.
//!
//! Attach order, and the reverse order it unwinds in on failure:
//!
//! ```text
//! 1. query the shared log version           (nothing to undo)
//! 2. allocate the zeroed region             free
//! 3. share it with the secure side          reclaim, leak on failure
//! 4. add it as the secure log               remove
//! 5. disable the secure console             (best effort, not undone)
//! 6. subscribe to call-returned             unsubscribe
//! 7. subscribe to panic                     unsubscribe
//! ```
//!
//! Memory the secure side will not give back is never freed: a leak is
//! survivable, the secure side writing into reused memory is not.

use std::sync::Arc;

use shmlog_ring::{HeapRegion, LOG_RING_DATA_OFFSET};

use crate::config::{DriverConfig, LOG_API_VERSION};
use crate::consumer::LogConsumer;
use crate::error::AttachError;
use crate::notify::{Notifications, Subscription, Trigger, TriggerHook};
use crate::ratelimit::{Clock, MonotonicClock, RateLimiter};
use crate::secure::{ConsoleCtl, SecureError, SecureSide, SharedMemId};
use crate::sink::LogSink;

/// Outcome of tearing a driver down. Detach itself cannot fail; this says
/// what went wrong along the way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetachReport {
    /// The secure side refused to stop logging into the region.
    pub remove_log: Option<SecureError>,
    /// The secure side refused to give the region back, so it was leaked.
    pub leaked: bool,
}

/// An attached log driver instance.
pub struct LogDriver<C: Clock + 'static = MonotonicClock> {
    secure: Arc<dyn SecureSide>,
    notifications: Arc<dyn Notifications>,
    consumer: Arc<LogConsumer<C>>,
    mem_id: SharedMemId,
    call_subscription: Subscription,
    panic_subscription: Subscription,
    detached: bool,
}

impl LogDriver<MonotonicClock> {
    /// Bring the driver up with the real clock.
    pub fn attach(
        secure: Arc<dyn SecureSide>,
        notifications: Arc<dyn Notifications>,
        sink: Arc<dyn LogSink>,
        config: DriverConfig,
    ) -> Result<Self, AttachError> {
        Self::attach_with_clock(secure, notifications, sink, config, MonotonicClock::new())
    }
}

impl<C: Clock + 'static> LogDriver<C> {
    pub fn attach_with_clock(
        secure: Arc<dyn SecureSide>,
        notifications: Arc<dyn Notifications>,
        sink: Arc<dyn LogSink>,
        config: DriverConfig,
        clock: C,
    ) -> Result<Self, AttachError> {
        let region_size = validate_config(&config)?;
        check_version(&*secure)?;

        let memory = Arc::new(HeapRegion::new_zeroed(config.region_size));

        let mem_id = match secure.share_memory(memory.region()) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "sharing secure log memory failed");
                return Err(AttachError::ShareMemory(e));
            }
        };

        if let Err(e) = secure.add_log(mem_id, region_size) {
            tracing::error!(error = %e, %mem_id, "adding secure log failed");
            release_memory(&*secure, mem_id, memory);
            return Err(AttachError::AddLog { id: mem_id, source: e });
        }

        if config.disable_secure_console
            && let Err(e) = secure.console_ctl(ConsoleCtl::Disable)
        {
            tracing::error!(error = %e, "disabling secure console failed");
        }

        let limiter = RateLimiter::with_clock(clock, config.rate_window, config.rate_burst);
        let consumer = Arc::new(
            LogConsumer::new(memory.clone(), sink, limiter)
                .with_secure_version(secure.version_string()),
        );
        let hook: Arc<dyn TriggerHook> = consumer.clone();

        let call_subscription = match notifications.subscribe(Trigger::CallReturned, hook.clone())
        {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(error = %e, "failed to register call notifier");
                drop((hook, consumer));
                remove_log(&*secure, mem_id);
                release_memory(&*secure, mem_id, memory);
                return Err(e.into());
            }
        };

        let panic_subscription = match notifications.subscribe(Trigger::Panic, hook) {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(error = %e, "failed to register panic notifier");
                notifications.unsubscribe(call_subscription);
                drop(consumer);
                remove_log(&*secure, mem_id);
                release_memory(&*secure, mem_id, memory);
                return Err(e.into());
            }
        };

        tracing::debug!(%mem_id, region_size, "secure log attached");

        Ok(Self {
            secure,
            notifications,
            consumer,
            mem_id,
            call_subscription,
            panic_subscription,
            detached: false,
        })
    }

    #[inline]
    pub fn consumer(&self) -> &Arc<LogConsumer<C>> {
        &self.consumer
    }

    #[inline]
    pub fn shared_mem_id(&self) -> SharedMemId {
        self.mem_id
    }

    /// Tear the driver down. Same as dropping it, but says how it went.
    pub fn detach(mut self) -> DetachReport {
        self.teardown()
    }

    fn teardown(&mut self) -> DetachReport {
        self.detached = true;

        self.notifications.unsubscribe(self.panic_subscription);
        self.notifications.unsubscribe(self.call_subscription);

        let remove_log = remove_log(&*self.secure, self.mem_id);
        let leaked = release_memory(
            &*self.secure,
            self.mem_id,
            self.consumer.memory().clone(),
        );

        DetachReport { remove_log, leaked }
    }
}

impl<C: Clock + 'static> Drop for LogDriver<C> {
    fn drop(&mut self) {
        if !self.detached {
            self.teardown();
        }
    }
}

fn validate_config(config: &DriverConfig) -> Result<u32, AttachError> {
    if config.region_size <= LOG_RING_DATA_OFFSET {
        return Err(AttachError::InvalidConfig("region smaller than log header"));
    }
    u32::try_from(config.region_size)
        .map_err(|_| AttachError::InvalidConfig("region size does not fit in 32 bits"))
}

fn check_version(secure: &dyn SecureSide) -> Result<(), AttachError> {
    match secure.log_version(LOG_API_VERSION) {
        Ok(found) if found == LOG_API_VERSION => Ok(()),
        Ok(found) => {
            tracing::info!(
                found,
                supported = LOG_API_VERSION,
                "unsupported secure log api version"
            );
            Err(AttachError::VersionMismatch {
                expected: LOG_API_VERSION,
                found,
            })
        }
        Err(SecureError::UndefinedCall) => {
            tracing::info!("secure log not supported on secure side");
            Err(AttachError::NotSupported)
        }
        Err(e) => {
            tracing::error!(error = %e, "secure log version query failed");
            Err(AttachError::VersionQuery(e))
        }
    }
}

fn remove_log(secure: &dyn SecureSide, mem_id: SharedMemId) -> Option<SecureError> {
    let e = secure.remove_log(mem_id).err()?;
    tracing::error!(error = %e, %mem_id, "removing secure log failed");
    Some(e)
}

/// Reclaim the region from the secure side, then let `memory` go.
/// Returns true if the memory had to be leaked.
fn release_memory(secure: &dyn SecureSide, mem_id: SharedMemId, memory: Arc<HeapRegion>) -> bool {
    match secure.reclaim_memory(mem_id) {
        Ok(()) => {
            drop(memory);
            false
        }
        Err(e) => {
            tracing::error!(error = %e, %mem_id, "reclaiming secure log memory failed, leaking it");
            // Keeps the allocation alive no matter who else lets go of it.
            std::mem::forget(memory);
            true
        }
    }
}
