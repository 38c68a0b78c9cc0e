//! Shared-memory log ring.
//!
//! A lossy single-producer single-consumer byte ring that an isolated,
//! higher-privilege environment (the "secure side") writes diagnostic text
//! into, and that the host drains line by line. The producer never waits on
//! the consumer: when it laps the reader, the reader detects it after the fact
//! and resynchronizes instead of emitting torn data.
//!
//! # Pieces
//!
//! - [`LogRingHeader`] / [`LogRing`]: the `repr(C)` layout shared with the producer
//! - [`LineBuffer`] / [`read_line`]: bounded line assembly out of the ring
//! - [`LogReader`]: the consumer drain loop with overwrite detection
//! - [`LogWriter`]: a model of the producer protocol, used by simulations and tests
//!
//! # Loom Testing
//!
//! Enable the `loom` feature to run the drain loop against a concurrent
//! producer under every interleaving loom can explore.
//!
//! ```text
//! cargo test -p shmlog-ring --features loom
//! ```

#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod layout;
pub mod line;
pub mod reader;
pub mod region;
pub mod sync;
pub mod writer;

pub use layout::{LOG_RING_DATA_OFFSET, LogRing, LogRingHeader, RingStatus};
pub use line::{LineBuffer, read_line};
pub use reader::{
    DRAIN_STEP_BUDGET_FACTOR, DrainStats, LineSink, LogReader, RingError,
};
#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;
pub use writer::LogWriter;
