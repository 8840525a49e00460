//! Ranking of probe results. Pure; no I/O.

use crate::probe::ProbeResult;

/// Successful results with a positive latency, fastest first. Ties keep
/// their probe order.
pub fn rank(results: &[ProbeResult]) -> Vec<&ProbeResult> {
    let mut ranked: Vec<&ProbeResult> = results
        .iter()
        .filter(|r| r.latency_ms().is_some_and(|ms| ms > 0))
        .collect();
    // `sort_by_key` is stable.
    ranked.sort_by_key(|r| r.latency_ms());
    ranked
}

/// The best connectable result, if any.
pub fn select(results: &[ProbeResult]) -> Option<&ProbeResult> {
    rank(results).into_iter().next()
}
