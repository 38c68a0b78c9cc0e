//! Calls into the secure side.
//!
//! Everything the driver needs from the secure environment goes through
//! [`SecureSide`]: the capability query, sharing and reclaiming the region,
//! and turning logging on and off for it. How the calls are carried (secure
//! monitor calls, a hypervisor interface, a simulation) is up to the
//! implementation.

use std::fmt;

use shmlog_ring::Region;

/// Handle the secure side returns for a shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedMemId(pub u64);

impl fmt::Display for SharedMemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Commands for the secure side's own console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCtl {
    /// Stop writing to the secure side's UART. Its output then only goes
    /// through the shared log, which it never waits on.
    Disable,
    Enable,
}

/// Error returned by a secure-side call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureError {
    /// The secure side does not implement the call.
    UndefinedCall,
    /// The call failed with a secure-side error code.
    Failed(i32),
}

impl fmt::Display for SecureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedCall => write!(f, "call not supported by secure side"),
            Self::Failed(code) => write!(f, "secure call failed: {}", code),
        }
    }
}

impl std::error::Error for SecureError {}

/// Secure-side services used by the log driver.
pub trait SecureSide: Send + Sync {
    /// Ask which shared-log interface version the secure side speaks,
    /// offering `requested`.
    fn log_version(&self, requested: u32) -> Result<u32, SecureError>;

    /// Share `region` with the secure side.
    fn share_memory(&self, region: Region) -> Result<SharedMemId, SecureError>;

    /// Take a shared region back. Until this succeeds the secure side may
    /// still write to the memory.
    fn reclaim_memory(&self, id: SharedMemId) -> Result<(), SecureError>;

    /// Start logging into a shared region of `size` bytes.
    fn add_log(&self, id: SharedMemId, size: u32) -> Result<(), SecureError>;

    /// Stop logging into a shared region.
    fn remove_log(&self, id: SharedMemId) -> Result<(), SecureError>;

    fn console_ctl(&self, ctl: ConsoleCtl) -> Result<(), SecureError>;

    /// Human-readable version of the secure side, if it has one.
    fn version_string(&self) -> Option<String> {
        None
    }
}
