use std::time::Duration;

use pnum_core::alloc::AllocPolicy;
use pnum_wire::codec::DEFAULT_MAX_LINE_BYTES;

pub const DEFAULT_BIND: &str = "localhost:44479";
pub const DEFAULT_BACKLOG: u32 = 5;
pub const DEFAULT_CEILING: u64 = u32::MAX as u64;
/// Bytes read from one socket per readiness event.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 4096;
pub const DEFAULT_KILL_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
/// Replies queued per connection before the peer is considered stalled.
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// `host:port` to listen on; resolved at bind time.
    pub bind: String,
    pub backlog: u32,
    /// Largest candidate that will ever be assigned.
    pub ceiling: u64,
    pub policy: AllocPolicy,
    pub read_chunk_bytes: usize,
    pub max_line_bytes: usize,
    pub outbound_queue_depth: usize,
    /// How long the kill broadcast waits for each monitor's queue to drain.
    pub kill_flush_timeout: Duration,
    pub metrics_snapshot_interval: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            backlog: DEFAULT_BACKLOG,
            ceiling: DEFAULT_CEILING,
            policy: AllocPolicy::default(),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            kill_flush_timeout: DEFAULT_KILL_FLUSH_TIMEOUT,
            metrics_snapshot_interval: None,
        }
    }
}
