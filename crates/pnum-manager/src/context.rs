use std::sync::Arc;

use pnum_core::alloc::{allocate, AllocPolicy};
use pnum_core::results::ResultStore;
use pnum_core::types::{HostId, StatusSnapshot, WorkRange};
use pnum_observe::metrics::{Counter, Gauge};

#[derive(Debug, Default)]
pub struct ManagerMetrics {
    pub accepted_total: Counter,
    pub ranges_issued_total: Counter,
    pub discoveries_total: Counter,
    pub duplicate_discoveries_total: Counter,
    pub decode_errors_total: Counter,
    pub protocol_violations_total: Counter,
    pub stalled_peers_dropped_total: Counter,
    pub open_connections: Gauge,
    pub compute_connections: Gauge,
    pub monitor_connections: Gauge,
    pub next_unassigned: Gauge,
}

pub fn emit_metrics_snapshot(metrics: &ManagerMetrics) {
    tracing::info!(
        target: "pnum_metrics",
        accepted_total = metrics.accepted_total.get(),
        ranges_issued_total = metrics.ranges_issued_total.get(),
        discoveries_total = metrics.discoveries_total.get(),
        duplicate_discoveries_total = metrics.duplicate_discoveries_total.get(),
        decode_errors_total = metrics.decode_errors_total.get(),
        protocol_violations_total = metrics.protocol_violations_total.get(),
        stalled_peers_dropped_total = metrics.stalled_peers_dropped_total.get(),
        open_connections = metrics.open_connections.get(),
        compute_connections = metrics.compute_connections.get(),
        monitor_connections = metrics.monitor_connections.get(),
        next_unassigned = metrics.next_unassigned.get(),
        "metrics"
    );
}

/// All coordinator state: the assignment cursor and the result store.
///
/// Owned by the reactor and handed to each handler by reference.
#[derive(Debug)]
pub struct ManagerContext {
    /// Last candidate handed out. Only ever increases.
    assigned_through: u64,
    ceiling: u64,
    policy: AllocPolicy,
    results: ResultStore,
    metrics: Arc<ManagerMetrics>,
}

impl ManagerContext {
    /// Candidate 1 is never assigned; the first range starts at 2.
    pub const INITIAL_CURSOR: u64 = 1;

    pub fn new(ceiling: u64, policy: AllocPolicy, metrics: Arc<ManagerMetrics>) -> Self {
        let ctx = Self {
            assigned_through: Self::INITIAL_CURSOR,
            ceiling,
            policy,
            results: ResultStore::new(),
            metrics,
        };
        ctx.metrics.next_unassigned.set(ctx.next_unassigned());
        ctx
    }

    pub fn next_unassigned(&self) -> u64 {
        self.assigned_through.saturating_add(1)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Records `host`'s throughput and commits the next range sized for it.
    ///
    /// `None` once the ceiling has been handed out.
    pub fn assign(&mut self, host: HostId, throughput: f64) -> Option<WorkRange> {
        self.results.record_throughput(host, throughput);
        let range = allocate(throughput, &self.policy, self.assigned_through, self.ceiling)?;
        self.assigned_through = range.end;
        self.metrics.ranges_issued_total.inc();
        self.metrics.next_unassigned.set(self.next_unassigned());
        Some(range)
    }

    /// Returns `false` for a value that was already known.
    pub fn record_discovery(&mut self, value: u64) -> bool {
        let fresh = self.results.record_discovery(value);
        if fresh {
            self.metrics.discoveries_total.inc();
        } else {
            self.metrics.duplicate_discoveries_total.inc();
        }
        fresh
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.results.snapshot()
    }
}
