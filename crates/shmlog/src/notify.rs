//! Host events that trigger a drain.

use std::fmt;
use std::sync::Arc;

/// Host event a drain can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// A call into the secure side just finished. Fired in normal operation;
    /// the drain takes the consumer's lock.
    CallReturned,
    /// The host is going down. The drain runs without the lock so it cannot
    /// deadlock the panic path.
    Panic,
}

/// What a call-notifier callback reports back to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyResult {
    /// Not interested in this event.
    Done,
    /// Handled.
    Handled,
}

/// Call notifications share one chain; only [`CallEvent::Returned`] drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// About to call into the secure side.
    Entering,
    /// Control came back from the secure side.
    Returned,
}

/// An event delivered to a [`TriggerHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Delivered on the [`Trigger::CallReturned`] chain.
    Call(CallEvent),
    /// Delivered on the [`Trigger::Panic`] chain.
    Panic,
}

impl Event {
    /// The chain this event is delivered on.
    pub fn trigger(self) -> Trigger {
        match self {
            Self::Call(_) => Trigger::CallReturned,
            Self::Panic => Trigger::Panic,
        }
    }
}

/// Receives events from the chains it subscribed to.
pub trait TriggerHook: Send + Sync {
    fn notify(&self, event: Event) -> NotifyResult;
}

/// Ticket for an active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub trigger: Trigger,
    pub id: u64,
}

/// Registration failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError {
    pub trigger: Trigger,
    pub reason: String,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to register {:?} notifier: {}",
            self.trigger, self.reason
        )
    }
}

impl std::error::Error for NotifyError {}

/// Host notification chains.
pub trait Notifications: Send + Sync {
    fn subscribe(
        &self,
        trigger: Trigger,
        hook: Arc<dyn TriggerHook>,
    ) -> Result<Subscription, NotifyError>;

    /// Remove a subscription. Once this returns the hook is not called again.
    fn unsubscribe(&self, subscription: Subscription);
}
