//! Reference model for the log ring drain.
//!
//! The producer's whole output is kept as one byte stream. After every
//! drain, each emitted line must match the stream at the position the model
//! expects, and every overflow must be one the counters justify.

use shmlog_ring::{HeapRegion, LineBuffer, LineSink, LogRing};

/// Minimum ring size (power of 2).
pub const MIN_CAPACITY: u32 = 16;
/// Maximum ring size for fuzzing (small to lap often).
pub const MAX_CAPACITY: u32 = 256;
/// Scratch size used by the model's drains.
pub const LINE_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub enum RingOp {
    /// Producer writes these bytes.
    Write(Vec<u8>),
    /// Consumer drains.
    Drain,
}

#[derive(Debug, PartialEq, Eq)]
enum Emitted {
    Line(Vec<u8>),
    Overflow(u32),
}

#[derive(Default)]
struct Recorder(Vec<Emitted>);

impl LineSink for Recorder {
    fn line(&mut self, line: &[u8]) {
        self.0.push(Emitted::Line(line.to_vec()));
    }

    fn overflow(&mut self, skipped: u32) {
        self.0.push(Emitted::Overflow(skipped));
    }
}

/// Run `ops` against a real ring whose counters start at `start`, checking
/// every drain against the model.
pub fn execute_and_verify(capacity: u32, start: u32, ops: &[RingOp]) -> Result<(), String> {
    let mem = HeapRegion::new_zeroed(capacity as usize + 64);
    // SAFETY: single-threaded, memory outlives the ring.
    let ring = unsafe { LogRing::init(mem.region(), capacity) };
    let header = ring.header();
    header.alloc.store(start, std::sync::atomic::Ordering::Relaxed);
    header.put.store(start, std::sync::atomic::Ordering::Relaxed);

    // stream[i] is the byte at counter start + i.
    let mut stream: Vec<u8> = Vec::new();
    let mut cursor = start;
    let mut line = LineBuffer::<LINE_SIZE>::new();

    for op in ops {
        match op {
            RingOp::Write(bytes) => {
                ring.writer().write(bytes);
                stream.extend_from_slice(bytes);
            }
            RingOp::Drain => {
                let mut rec = Recorder::default();
                let before = cursor;
                let stats = ring
                    .reader()
                    .drain(&mut cursor, &mut line, &mut rec)
                    .map_err(|e| format!("drain refused: {e}"))?;

                if stats.budget_exhausted || stats.ahead_of_commit {
                    return Err(format!("unexpected stop: {stats:?}"));
                }
                if stats.overflows > 1 {
                    return Err(format!("{} overflows in one drain", stats.overflows));
                }
                verify_drain(&stream, start, before, capacity, &rec.0)?;

                let end = start.wrapping_add(stream.len() as u32);
                if cursor != end {
                    return Err(format!("cursor {cursor} did not reach put {end}"));
                }
            }
        }
    }
    Ok(())
}

fn verify_drain(
    stream: &[u8],
    start: u32,
    cursor: u32,
    capacity: u32,
    emitted: &[Emitted],
) -> Result<(), String> {
    let alloc = stream.len() as u64;
    let mut pos = cursor.wrapping_sub(start) as u64;

    for e in emitted {
        match e {
            Emitted::Overflow(skipped) => {
                if alloc.saturating_sub(pos) <= capacity as u64 {
                    return Err(format!("overflow reported at {pos} with nothing lapped"));
                }
                pos += *skipped as u64;
                if pos != alloc - capacity as u64 {
                    return Err(format!("resync to {pos}, expected {}", alloc - capacity as u64));
                }
            }
            Emitted::Line(line) => {
                if pos > alloc || alloc - pos > capacity as u64 {
                    return Err(format!("line emitted from overwritten position {pos}"));
                }
                let from = pos as usize;
                let to = from + line.len();
                if stream.get(from..to) != Some(line.as_slice()) {
                    return Err(format!(
                        "line at {pos} is {:?}, stream has {:?}",
                        line.escape_ascii().to_string(),
                        stream
                            .get(from..to.min(stream.len()))
                            .unwrap_or_default()
                            .escape_ascii()
                            .to_string()
                    ));
                }
                if line.contains(&b'\n') {
                    return Err("newline inside emitted line".into());
                }
                pos = to as u64;
                if line.len() < LINE_SIZE - 1 && stream.get(to) == Some(&b'\n') {
                    pos += 1;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_accepts_simple_session() {
        let ops = vec![
            RingOp::Write(b"hi\n".to_vec()),
            RingOp::Drain,
            RingOp::Write(vec![b'z'; 40]),
            RingOp::Drain,
            RingOp::Drain,
        ];
        execute_and_verify(16, 0, &ops).unwrap();
        execute_and_verify(16, u32::MAX - 10, &ops).unwrap();
    }
}
