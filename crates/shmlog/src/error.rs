//! Attach-time errors.

use std::fmt;

use crate::notify::NotifyError;
use crate::secure::{SecureError, SharedMemId};

/// Why a driver instance could not come up.
///
/// Whatever was acquired before the failure has been released by the time
/// this is returned, except shared memory the secure side refused to give
/// back, which is leaked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The configuration cannot describe a log region.
    InvalidConfig(&'static str),
    /// The secure side has no shared log support.
    NotSupported,
    /// The secure side speaks a different shared log version.
    VersionMismatch { expected: u32, found: u32 },
    /// The version query itself failed.
    VersionQuery(SecureError),
    /// Sharing the region with the secure side failed.
    ShareMemory(SecureError),
    /// The secure side refused to log into the shared region.
    AddLog { id: SharedMemId, source: SecureError },
    /// A host notifier could not be registered.
    Notifier(NotifyError),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::NotSupported => write!(f, "shared log not supported on secure side"),
            Self::VersionMismatch { expected, found } => write!(
                f,
                "unsupported shared log version: {}, supported: {}",
                found, expected
            ),
            Self::VersionQuery(e) => write!(f, "shared log version query failed: {}", e),
            Self::ShareMemory(e) => write!(f, "sharing log memory failed: {}", e),
            Self::AddLog { id, source } => {
                write!(f, "adding shared log {} failed: {}", id, source)
            }
            Self::Notifier(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AttachError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::VersionQuery(e) | Self::ShareMemory(e) => Some(e),
            Self::AddLog { source, .. } => Some(source),
            Self::Notifier(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NotifyError> for AttachError {
    fn from(e: NotifyError) -> Self {
        Self::Notifier(e)
    }
}
