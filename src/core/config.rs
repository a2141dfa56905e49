//! Centralized configuration constants for dropwire.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format details stay in `core::protocol`.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Chunk size in bytes (256 KiB). Each chunk travels as one raw binary
/// frame on the channel; the last chunk of a file may be smaller.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// High-water mark for the channel's outbound buffer (8 MiB).
///
/// When `buffered_amount` exceeds this value, the upload driver pauses
/// chunk transmission until the buffer drains back at or below it. This is
/// the sole flow-control mechanism: it bounds memory regardless of how fast
/// the source reads relative to how fast the channel drains.
pub const BUFFER_LIMIT: usize = 8 * 1024 * 1024;

/// Poll interval while waiting for the outbound buffer to drain.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

// ── Progress / Throughput ────────────────────────────────────────────────────

/// Minimum wall-clock interval between progress/throughput samples.
/// Throughput is computed over the bytes moved since the previous sample.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

// ── Liveness ─────────────────────────────────────────────────────────────────

/// Heartbeat interval: a `Ping` control message is sent this often while
/// the session is up, independent of transfer activity.
pub const PING_INTERVAL: Duration = Duration::from_secs(3);

// ── Scheduling ───────────────────────────────────────────────────────────────

/// Delay before rescheduling the queue after an upload-side cancellation.
/// Lets the `Cancel` control message flush ahead of any new `Header` sent
/// on the same ordered channel.
pub const CANCEL_FLUSH_DELAY: Duration = Duration::from_millis(500);
