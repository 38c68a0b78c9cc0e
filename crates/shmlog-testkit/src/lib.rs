//! In-process stand-ins for everything `shmlog` talks to.
//!
//! - [`SimulatedSecureSide`]: answers the shared-log calls and, once a region
//!   has been added, writes into it the way the secure side's logger does
//! - [`SimulatedNotifications`]: notifier chains that can be fired by hand
//! - [`RecordingSink`]: keeps everything it is given
//! - [`ManualClock`]: time only moves when told to
//!
//! Every simulated component can be told to fail specific calls, which is
//! how the attach and detach error paths are exercised.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shmlog::{
    Clock, ConsoleCtl, Event, LogSink, NotifyError, NotifyResult, Notifications, SecureError,
    SecureSide, SharedMemId, Subscription, Trigger, TriggerHook,
};
use shmlog_ring::{LOG_RING_DATA_OFFSET, LogRing, Region};

/// A call the driver made into the simulated secure side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureCall {
    LogVersion(u32),
    ShareMemory { len: usize },
    ReclaimMemory(SharedMemId),
    AddLog(SharedMemId, u32),
    RemoveLog(SharedMemId),
    ConsoleCtl(ConsoleCtl),
}

/// Which simulated calls should fail, and how.
#[derive(Debug, Clone, Default)]
pub struct Failures {
    /// Override the version answer.
    pub log_version: Option<Result<u32, SecureError>>,
    pub share_memory: Option<SecureError>,
    pub reclaim_memory: Option<SecureError>,
    pub add_log: Option<SecureError>,
    pub remove_log: Option<SecureError>,
    pub console_ctl: Option<SecureError>,
}

struct SharedLog {
    id: SharedMemId,
    region: Region,
    ring: Option<LogRing>,
}

struct SecureState {
    next_id: u64,
    shared: Option<SharedLog>,
    console_enabled: bool,
    calls: Vec<SecureCall>,
}

/// Simulated secure environment with one shared log.
pub struct SimulatedSecureSide {
    version: u32,
    version_string: Option<String>,
    failures: Mutex<Failures>,
    state: Mutex<SecureState>,
}

impl SimulatedSecureSide {
    pub fn new() -> Self {
        Self {
            version: shmlog::config::LOG_API_VERSION,
            version_string: Some("sim-secure-os 1.0".to_owned()),
            failures: Mutex::new(Failures::default()),
            state: Mutex::new(SecureState {
                next_id: 0x1_0000_0001,
                shared: None,
                console_enabled: true,
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_failures(self, failures: Failures) -> Self {
        *self.failures.lock() = failures;
        self
    }

    pub fn set_failures(&self, failures: Failures) {
        *self.failures.lock() = failures;
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<SecureCall> {
        self.state.lock().calls.clone()
    }

    /// True while a region is shared (added or not).
    pub fn holds_memory(&self) -> bool {
        self.state.lock().shared.is_some()
    }

    /// True while the secure side is logging into a region.
    pub fn is_logging(&self) -> bool {
        self.state
            .lock()
            .shared
            .as_ref()
            .is_some_and(|s| s.ring.is_some())
    }

    pub fn console_enabled(&self) -> bool {
        self.state.lock().console_enabled
    }

    /// Log `bytes` the way the secure side's logger would. Returns false if
    /// no region is being logged into.
    pub fn log(&self, bytes: &[u8]) -> bool {
        let state = self.state.lock();
        match state.shared.as_ref().and_then(|s| s.ring.as_ref()) {
            Some(ring) => {
                ring.writer().write(bytes);
                true
            }
            None => false,
        }
    }

    /// The ring the secure side is logging into, for tampering with counters.
    pub fn with_ring<R>(&self, f: impl FnOnce(&LogRing) -> R) -> Option<R> {
        let state = self.state.lock();
        state.shared.as_ref().and_then(|s| s.ring.as_ref()).map(f)
    }

    fn record(&self, call: SecureCall) {
        self.state.lock().calls.push(call);
    }
}

impl Default for SimulatedSecureSide {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest power-of-two data area that fits in a region of `size` bytes.
fn ring_size_for(size: u32) -> u32 {
    let data = size.saturating_sub(LOG_RING_DATA_OFFSET as u32);
    if data == 0 {
        0
    } else {
        1 << (31 - data.leading_zeros())
    }
}

impl SecureSide for SimulatedSecureSide {
    fn log_version(&self, requested: u32) -> Result<u32, SecureError> {
        self.record(SecureCall::LogVersion(requested));
        match self.failures.lock().log_version {
            Some(answer) => answer,
            None => Ok(self.version),
        }
    }

    fn share_memory(&self, region: Region) -> Result<SharedMemId, SecureError> {
        self.record(SecureCall::ShareMemory { len: region.len() });
        if let Some(e) = self.failures.lock().share_memory {
            return Err(e);
        }
        let mut state = self.state.lock();
        let id = SharedMemId(state.next_id);
        state.next_id += 1;
        state.shared = Some(SharedLog {
            id,
            region,
            ring: None,
        });
        Ok(id)
    }

    fn reclaim_memory(&self, id: SharedMemId) -> Result<(), SecureError> {
        self.record(SecureCall::ReclaimMemory(id));
        if let Some(e) = self.failures.lock().reclaim_memory {
            return Err(e);
        }
        let mut state = self.state.lock();
        if state.shared.as_ref().is_some_and(|s| s.id == id) {
            state.shared = None;
            Ok(())
        } else {
            Err(SecureError::Failed(-22))
        }
    }

    fn add_log(&self, id: SharedMemId, size: u32) -> Result<(), SecureError> {
        self.record(SecureCall::AddLog(id, size));
        if let Some(e) = self.failures.lock().add_log {
            return Err(e);
        }
        let mut state = self.state.lock();
        let shared = match state.shared.as_mut() {
            Some(shared) if shared.id == id && size as usize <= shared.region.len() => shared,
            _ => return Err(SecureError::Failed(-22)),
        };
        // SAFETY: the host shared the region with us and does not free it
        // until reclaim succeeds; nobody else writes to it.
        shared.ring = Some(unsafe { LogRing::init(shared.region, ring_size_for(size)) });
        Ok(())
    }

    fn remove_log(&self, id: SharedMemId) -> Result<(), SecureError> {
        self.record(SecureCall::RemoveLog(id));
        if let Some(e) = self.failures.lock().remove_log {
            return Err(e);
        }
        let mut state = self.state.lock();
        match state.shared.as_mut() {
            Some(shared) if shared.id == id => {
                shared.ring = None;
                Ok(())
            }
            _ => Err(SecureError::Failed(-22)),
        }
    }

    fn console_ctl(&self, ctl: ConsoleCtl) -> Result<(), SecureError> {
        self.record(SecureCall::ConsoleCtl(ctl));
        if let Some(e) = self.failures.lock().console_ctl {
            return Err(e);
        }
        self.state.lock().console_enabled = ctl == ConsoleCtl::Enable;
        Ok(())
    }

    fn version_string(&self) -> Option<String> {
        self.version_string.clone()
    }
}

/// Notifier chains driven by hand.
#[derive(Default)]
pub struct SimulatedNotifications {
    hooks: Mutex<BTreeMap<u64, (Trigger, Arc<dyn TriggerHook>)>>,
    next_id: Mutex<u64>,
    refuse: Mutex<Vec<Trigger>>,
}

impl SimulatedNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subscriptions to `trigger` fail.
    pub fn refuse(&self, trigger: Trigger) {
        self.refuse.lock().push(trigger);
    }

    pub fn subscribers(&self, trigger: Trigger) -> usize {
        self.hooks
            .lock()
            .values()
            .filter(|(t, _)| *t == trigger)
            .count()
    }

    /// Deliver `event` to every hook on its chain, in subscription order.
    pub fn fire(&self, event: Event) -> Vec<NotifyResult> {
        // Snapshot so hooks can run without the registry lock.
        let hooks: Vec<_> = self
            .hooks
            .lock()
            .values()
            .filter(|(t, _)| *t == event.trigger())
            .map(|(_, h)| h.clone())
            .collect();
        hooks.iter().map(|h| h.notify(event)).collect()
    }

    /// A call into the secure side: entering, then returned.
    pub fn secure_call(&self) {
        self.fire(Event::Call(shmlog::CallEvent::Entering));
        self.fire(Event::Call(shmlog::CallEvent::Returned));
    }
}

impl Notifications for SimulatedNotifications {
    fn subscribe(
        &self,
        trigger: Trigger,
        hook: Arc<dyn TriggerHook>,
    ) -> Result<Subscription, NotifyError> {
        if self.refuse.lock().contains(&trigger) {
            return Err(NotifyError {
                trigger,
                reason: "refused by simulation".to_owned(),
            });
        }
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        self.hooks.lock().insert(id, (trigger, hook));
        Ok(Subscription { trigger, id })
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.hooks.lock().remove(&subscription.id);
    }
}

/// Something a [`RecordingSink`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Line(String),
    Overflow(u32),
}

/// Sink that keeps everything.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Record>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Just the lines, in order.
    pub fn lines(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Record::Line(l) => Some(l.clone()),
                Record::Overflow(_) => None,
            })
            .collect()
    }

    pub fn overflows(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| matches!(r, Record::Overflow(_)))
            .count()
    }
}

impl LogSink for RecordingSink {
    fn line(&self, line: &[u8]) {
        self.records
            .lock()
            .push(Record::Line(String::from_utf8_lossy(line).into_owned()));
    }

    fn overflow(&self, skipped: u32) {
        self.records.lock().push(Record::Overflow(skipped));
    }
}

/// Clock that only moves when advanced.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
        tracing::trace!(now = ?*self.now.lock(), "manual clock advanced");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
