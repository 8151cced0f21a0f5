use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host a compute worker connected from; the key of the throughput table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub String);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRange {
    pub start: u64,
    pub end: u64, // inclusive [start, end]
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("range must start at 1 or above (got {start})")]
    ZeroStart { start: u64 },
    #[error("range start {start} is past its end {end}")]
    Inverted { start: u64, end: u64 },
}

impl WorkRange {
    pub fn new(start: u64, end: u64) -> Result<Self, RangeError> {
        if start == 0 {
            return Err(RangeError::ZeroStart { start });
        }
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of candidates covered. Never zero for a validated range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, candidate: u64) -> bool {
        self.start <= candidate && candidate <= self.end
    }
}

/// Point-in-time view of the manager's results, as served to report clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Last reported throughput per worker host.
    pub clients: BTreeMap<HostId, f64>,
    /// Discovered values, ascending and without duplicates.
    pub discovered: Vec<u64>,
}

/// Role a connection takes on after its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Unclassified,
    Compute,
    Monitor,
    Report,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Unclassified => "unclassified",
            Role::Compute => "compute",
            Role::Monitor => "monitor",
            Role::Report => "report",
        };
        f.write_str(name)
    }
}
