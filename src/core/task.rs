//! Transfer task model: one file moving in one direction.
//!
//! A task is created either locally (upload, user picked a file) or by an
//! inbound `Header` (download). All protocol messages for the task are
//! correlated by its `id`.

use std::time::Instant;

use uuid::Uuid;

use crate::core::config::SAMPLE_INTERVAL;
use crate::core::io::FileSource;

// ── Direction / Status ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We read the file locally and stream it to the peer.
    Upload,
    /// The peer streams the file to us and we write it to a sink.
    Download,
}

/// Lifecycle states. `Waiting → Active → {Done | Cancelled | Error}`;
/// terminal states are final, a task never re-enters `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued, not yet started (uploads only — downloads start active).
    Waiting,
    /// Currently occupying the engine's single active slot.
    Active,
    /// Completed successfully; all bytes moved.
    Done,
    /// Aborted by either side.
    Cancelled,
    /// Failed on local I/O (never caused by cancellation).
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Error
        )
    }
}

// ── TransferTask ─────────────────────────────────────────────────────────────

/// One file transfer, either direction.
pub struct TransferTask {
    /// Unique id, chosen by the initiating side; correlates all protocol
    /// messages for this transfer.
    pub id: Uuid,
    pub direction: Direction,
    pub name: String,
    /// Total size in bytes, known up front.
    pub size: u64,
    /// Bytes transferred so far. Never exceeds `size`.
    pub transferred: u64,
    pub status: TaskStatus,
    /// Source handle, present until the upload driver takes it.
    pub source: Option<Box<dyn FileSource>>,
}

impl TransferTask {
    /// Create a locally-initiated upload in the `Waiting` state. The id is
    /// chosen by the caller so it can be handed back before the engine has
    /// processed the enqueue.
    pub fn upload(id: Uuid, name: String, size: u64, source: Box<dyn FileSource>) -> Self {
        Self {
            id,
            direction: Direction::Upload,
            name,
            size,
            transferred: 0,
            status: TaskStatus::Waiting,
            source: Some(source),
        }
    }

    /// Create a peer-initiated download, active immediately (downloads
    /// never wait in the local queue).
    pub fn download(id: Uuid, name: String, size: u64) -> Self {
        Self {
            id,
            direction: Direction::Download,
            name,
            size,
            transferred: 0,
            status: TaskStatus::Active,
            source: None,
        }
    }
}

// ── Progress sampling ────────────────────────────────────────────────────────

/// Overall percentage progress, floored: `transferred / size × 100`.
pub fn percent(transferred: u64, size: u64) -> u8 {
    if size == 0 {
        return 100;
    }
    (transferred.saturating_mul(100) / size).min(100) as u8
}

/// One throughput/progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub percent: u8,
    /// MB/s over the last interval (1024-based).
    pub mbps: f64,
}

/// Interval accumulator for progress/throughput reporting.
///
/// Bytes are recorded as they move; a [`Sample`] is produced once at least
/// [`SAMPLE_INTERVAL`] has elapsed since the previous one, after which the
/// interval counters reset.
pub struct ProgressMeter {
    last_sample: Instant,
    bytes_since: u64,
}

impl ProgressMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            last_sample: now,
            bytes_since: 0,
        }
    }

    /// Record bytes moved since the last call.
    pub fn record(&mut self, bytes: usize) {
        self.bytes_since += bytes as u64;
    }

    /// Produce a sample if the interval has elapsed, resetting the counters.
    pub fn sample(&mut self, now: Instant, transferred: u64, size: u64) -> Option<Sample> {
        let elapsed = now.duration_since(self.last_sample);
        if elapsed < SAMPLE_INTERVAL {
            return None;
        }
        let mbps = (self.bytes_since as f64 / 1024.0 / 1024.0) / elapsed.as_secs_f64();
        self.last_sample = now;
        self.bytes_since = 0;
        Some(Sample {
            percent: percent(transferred, size),
            mbps,
        })
    }
}
