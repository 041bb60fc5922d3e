//! Relay selector (§4.5): pick the best reachable relay from a candidate
//! list. A pure function of its input — no I/O, no randomness — so it is
//! trivially testable and reusable from both `relay-node` (choosing a sync
//! peer) and `directory-node` (serving `/api/relays/best`).

/// Everything the selector needs to know about one candidate relay.
pub trait SelectorInput {
    /// Reported round-trip latency in milliseconds, if known.
    fn latency_ms(&self) -> Option<f64>;
    /// Reachability in `[0, 1]`, if known.
    fn reachability(&self) -> Option<f64>;
    /// How fresh the candidate's chain is relative to the canonical
    /// manifest, in `[0, 1]`, if known.
    fn chain_freshness(&self) -> Option<f64>;
    /// Whether the candidate is believed to be blocked by state-level
    /// network interference.
    fn gfw_blocked(&self) -> bool;
}

/// A bare candidate used for standalone scoring tests and simple callers
/// that don't have a full `RelayRecord` on hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct Candidate {
    pub latency_ms: Option<f64>,
    pub reachability: Option<f64>,
    pub chain_freshness: Option<f64>,
    pub gfw_blocked: bool,
}

impl SelectorInput for Candidate {
    fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    fn reachability(&self) -> Option<f64> {
        self.reachability
    }

    fn chain_freshness(&self) -> Option<f64> {
        self.chain_freshness
    }

    fn gfw_blocked(&self) -> bool {
        self.gfw_blocked
    }
}

/// `score = (0.5*latencyScore + 0.25*reachabilityScore + 0.25*freshnessScore) * gfwPenalty`.
pub fn score(candidate: &impl SelectorInput) -> f64 {
    let latency_ms = match candidate.latency_ms() {
        Some(ms) if ms > 0.0 => ms,
        _ => 1500.0,
    };
    let latency_score = (1.0 - latency_ms.min(3000.0) / 3000.0).max(0.0);
    let reachability_score = candidate.reachability().unwrap_or(0.5);
    let freshness_score = candidate.chain_freshness().unwrap_or(0.5);
    let gfw_penalty = if candidate.gfw_blocked() { 0.2 } else { 1.0 };

    (0.5 * latency_score + 0.25 * reachability_score + 0.25 * freshness_score) * gfw_penalty
}

/// The candidate with the maximum score; ties broken by input order.
/// Returns `None` for an empty list.
pub fn select_best<T: SelectorInput>(candidates: &[T]) -> Option<&T> {
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let s = score(candidate);
        let replace = match best {
            Some((_, best_score)) => s > best_score,
            None => true,
        };
        if replace {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| &candidates[i])
}
