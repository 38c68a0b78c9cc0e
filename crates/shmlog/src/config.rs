//! Fixed sizing and rate-limit constants.

use std::time::Duration;

/// Page size assumed for the shared region.
pub const PAGE_SIZE: usize = 4096;

/// Size of the region shared with the secure side, header included.
pub const LOG_REGION_SIZE: usize = PAGE_SIZE * 2;

/// Scratch size for one forwarded line, terminator included.
pub const LINE_BUFFER_SIZE: usize = shmlog_ring::line::DEFAULT_LINE_BUFFER_SIZE;

/// Rate-limit window.
///
/// A slow console on the host side can stall whoever else is logging, so
/// forwarding is capped. Secure-side crash dumps are short enough that a
/// full burst normally covers one with context to spare.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Lines forwarded per window.
pub const RATE_LIMIT_BURST: u32 = 100;

/// Shared-log interface version this driver speaks.
pub const LOG_API_VERSION: u32 = 1;

/// Construction-time configuration for a driver instance.
///
/// The defaults are the constants above; nothing here can change once the
/// driver is attached.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Bytes to allocate and share, header included.
    pub region_size: usize,
    /// Rate-limit window.
    pub rate_window: Duration,
    /// Lines per window.
    pub rate_burst: u32,
    /// Ask the secure side to turn off its own synchronous console.
    pub disable_secure_console: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            region_size: LOG_REGION_SIZE,
            rate_window: RATE_LIMIT_WINDOW,
            rate_burst: RATE_LIMIT_BURST,
            disable_secure_console: true,
        }
    }
}
