//! Throughput-proportional partitioning of the candidate space.
//!
//! Testing candidate `n` costs roughly `sqrt(n)` trial divisions, so a range is
//! grown from the cursor until the summed cost reaches the worker's operation
//! budget for one time slice.

use crate::types::WorkRange;

/// Upper bound on candidates in a single range unless configured otherwise.
pub const DEFAULT_MAX_SPAN: u64 = 50_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocPolicy {
    /// Wall-clock seconds of work one range should represent.
    pub time_budget_secs: f64,
    /// Scales reported throughput into an operation budget.
    pub calibration: f64,
    /// Hard cap on the candidates in one range; keeps the accumulation loop bounded.
    pub max_span: u64,
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self {
            time_budget_secs: 30.0,
            calibration: 0.001,
            max_span: DEFAULT_MAX_SPAN,
        }
    }
}

impl AllocPolicy {
    /// `throughput × time_budget × calibration`, or zero when that is not a
    /// positive number. An infinite budget is left for `max_span` to cap.
    pub fn operation_budget(&self, throughput: f64) -> f64 {
        let budget = throughput * self.time_budget_secs * self.calibration;
        if budget > 0.0 {
            budget
        } else {
            0.0
        }
    }
}

/// Computes the range following `cursor` (the last candidate already handed out).
///
/// Returns `None` once `cursor` has reached `ceiling`. A zero budget yields the
/// single-candidate range `(cursor + 1, cursor + 1)`. The caller commits the
/// result by advancing its cursor to `range.end`.
pub fn allocate(
    throughput: f64,
    policy: &AllocPolicy,
    cursor: u64,
    ceiling: u64,
) -> Option<WorkRange> {
    if cursor >= ceiling {
        return None;
    }
    let start = cursor + 1;
    let span = policy.max_span.max(1);
    let limit = ceiling.min(start.saturating_add(span - 1));
    let budget = policy.operation_budget(throughput);

    let mut idx = cursor;
    let mut spent = 0.0_f64;
    while spent < budget && idx < limit {
        idx += 1;
        spent += (idx as f64).sqrt();
    }

    Some(WorkRange {
        start,
        end: idx.max(start),
    })
}
