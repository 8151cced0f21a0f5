use std::collections::{BTreeMap, BTreeSet};

use crate::types::{HostId, StatusSnapshot};

/// Discovered values plus the last throughput each worker host reported.
///
/// Throughput entries outlive the connection that reported them.
#[derive(Debug, Default, Clone)]
pub struct ResultStore {
    throughput: BTreeMap<HostId, f64>,
    discovered: BTreeSet<u64>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn record_throughput(&mut self, host: HostId, value: f64) {
        self.throughput.insert(host, value);
    }

    /// Returns `false` when the value was already known.
    pub fn record_discovery(&mut self, value: u64) -> bool {
        self.discovered.insert(value)
    }

    pub fn throughput_of(&self, host: &HostId) -> Option<f64> {
        self.throughput.get(host).copied()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            clients: self.throughput.clone(),
            discovered: self.discovered.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> HostId {
        HostId(name.to_string())
    }

    #[test]
    fn discovery_is_idempotent() {
        let mut store = ResultStore::new();
        assert!(store.record_discovery(28));
        assert!(!store.record_discovery(28));
        assert_eq!(store.snapshot().discovered, vec![28]);
    }

    #[test]
    fn snapshot_is_sorted_regardless_of_insert_order() {
        let mut store = ResultStore::new();
        for value in [8128, 6, 496, 28, 6] {
            store.record_discovery(value);
        }
        assert_eq!(store.snapshot().discovered, vec![6, 28, 496, 8128]);
    }

    #[test]
    fn throughput_is_last_write_wins() {
        let mut store = ResultStore::new();
        store.record_throughput(host("a"), 10.0);
        store.record_throughput(host("b"), 20.0);
        store.record_throughput(host("a"), 15.0);

        let snap = store.snapshot();
        assert_eq!(snap.clients.len(), 2);
        assert_eq!(snap.clients.get(&host("a")), Some(&15.0));
        assert_eq!(store.throughput_of(&host("b")), Some(20.0));
    }
}
