use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::events::ProgressReport;

/// Minimum time between two emitted reports. Purely a display concern;
/// the cumulative total is updated on every delta regardless.
const THROTTLE: Duration = Duration::from_millis(500);

/// Display width for the current file name, tail-preserving.
const NAME_WIDTH: usize = 30;

const MEGABYTE: f64 = 1_048_576.0;

/// Folds a stream of byte-count deltas into a throttled rate/total
/// reading. One instance per transfer run; skipped files feed their
/// full size through here too so percentage math stays consistent.
pub struct ProgressAggregator {
    total_bytes: u64,
    bytes_at_last_emit: u64,
    last_emit: Instant,
    throttle: Duration,
    sink: Option<mpsc::Sender<ProgressReport>>,
}

impl ProgressAggregator {
    pub fn new(sink: Option<mpsc::Sender<ProgressReport>>) -> Self {
        Self {
            total_bytes: 0,
            bytes_at_last_emit: 0,
            last_emit: Instant::now(),
            throttle: THROTTLE,
            sink,
        }
    }

    /// Override the emission interval (tests use zero to force a report
    /// per delta).
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Add one delta. Emits a report when the throttle window elapsed;
    /// a full sink drops the report rather than blocking the transfer.
    pub fn record(&mut self, delta: u64, current_file: &str) {
        self.total_bytes += delta;

        let elapsed = self.last_emit.elapsed();
        if elapsed < self.throttle {
            return;
        }

        let rate = (self.total_bytes - self.bytes_at_last_emit) as f64
            / elapsed.as_secs_f64().max(f64::EPSILON);
        let report = ProgressReport {
            cumulative_mb: self.total_bytes as f64 / MEGABYTE,
            rate_mbps: rate / MEGABYTE,
            current_file: truncate_tail(current_file, NAME_WIDTH),
        };

        if let Some(sink) = &self.sink {
            let _ = sink.try_send(report);
        }

        self.last_emit = Instant::now();
        self.bytes_at_last_emit = self.total_bytes;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Keep the last `width` characters of a name, the end being the part
/// that distinguishes deep paths.
fn truncate_tail(name: &str, width: usize) -> String {
    let count = name.chars().count();
    if count <= width {
        name.to_string()
    } else {
        name.chars().skip(count - width).collect()
    }
}
