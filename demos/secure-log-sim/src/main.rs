//! Secure log simulation.
//!
//! A simulated secure side writes log lines into the shared ring while a
//! ticker plays the part of the host making secure calls. Every returned call
//! drains the ring into `tracing`; at the end a simulated panic flushes what
//! is left before the driver detaches.
//!
//! ```text
//! RUST_LOG=info cargo run -p secure-log-sim -- --lines 500 --burst 20
//! ```

use std::sync::Arc;
use std::time::Duration;

use shmlog::{DriverConfig, Event, LogDriver, TracingSink};
use shmlog_testkit::{SimulatedNotifications, SimulatedSecureSide};

struct Args {
    lines: u32,
    burst: u32,
    call_interval: Duration,
}

fn parse_args() -> Args {
    let mut args = Args {
        lines: 300,
        burst: 50,
        call_interval: Duration::from_millis(20),
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let value = it.next();
        let parsed = match arg.as_str() {
            "--lines" => parse_value(value.as_deref()).map(|v| args.lines = v),
            "--burst" => parse_value(value.as_deref()).map(|v| args.burst = v),
            "--call-interval-ms" => {
                parse_value(value.as_deref()).map(|v| args.call_interval = Duration::from_millis(v))
            }
            _ => None,
        };
        if parsed.is_none() {
            eprintln!("usage: secure-log-sim [--lines N] [--burst N] [--call-interval-ms N]");
            std::process::exit(2);
        }
    }
    args
}

/// Parses a flag value into the flag's own type, so out-of-range input is
/// rejected instead of truncated.
fn parse_value<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_rejects_out_of_range() {
        assert_eq!(parse_value::<u32>(Some("500")), Some(500));
        assert_eq!(parse_value::<u32>(Some("4294967296")), None);
        assert_eq!(parse_value::<u32>(Some("-1")), None);
        assert_eq!(parse_value::<u32>(None), None);
        assert_eq!(parse_value::<u64>(Some("4294967296")), Some(4_294_967_296));
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    let secure = Arc::new(SimulatedSecureSide::new());
    let notifications = Arc::new(SimulatedNotifications::new());
    let config = DriverConfig {
        rate_burst: args.burst,
        ..DriverConfig::default()
    };

    let driver = match LogDriver::attach(
        secure.clone(),
        notifications.clone(),
        Arc::new(TracingSink),
        config,
    ) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("[secure-log-sim] attach failed: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(mem_id = %driver.shared_mem_id(), "driver attached");

    let producer = {
        let secure = secure.clone();
        let lines = args.lines;
        tokio::spawn(async move {
            for i in 0..lines {
                let line = format!("secure world: request {i} handled\n");
                if !secure.log(line.as_bytes()) {
                    break;
                }
                if i % 16 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            // Left unterminated: only the panic flush below picks it up.
            secure.log(b"secure world: shutting down");
        })
    };

    let ticker = {
        let notifications = notifications.clone();
        let interval = args.call_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            for _ in 0..10 {
                tick.tick().await;
                notifications.secure_call();
            }
        })
    };

    if let Err(e) = producer.await {
        eprintln!("[secure-log-sim] producer task failed: {e}");
    }
    if let Err(e) = ticker.await {
        eprintln!("[secure-log-sim] ticker task failed: {e}");
    }

    notifications.fire(Event::Panic);

    let consumer = driver.consumer();
    tracing::info!(
        cursor = consumer.cursor(),
        suppressed = consumer.limiter().suppressed(),
        "simulation finished"
    );

    let report = driver.detach();
    if let Some(e) = report.remove_log {
        eprintln!("[secure-log-sim] remove_log failed: {e}");
    }
}
