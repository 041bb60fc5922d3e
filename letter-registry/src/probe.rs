//! Reachability probe classification (§4.4). The actual GET to
//! `<publicUrl>/api/status` is `directory-node`'s job (it owns the HTTP
//! client and the timeout); this module is the pure classification of
//! whatever outcome that call produces, so the "is this GFW?" heuristic is
//! unit-testable without a network.

/// The transport-level error classes named explicitly by §4.4.
/// Anything else classifies as `Other` and does not trip `gfwBlocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Abort,
    ConnectionReset,
    NetReset,
    Refused,
    HostUnreachable,
    TimedOut,
    Other,
}

/// The metrics recorded for one relay after one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub latency_ms: Option<u64>,
    pub reachability: f64,
    pub gfw_blocked: bool,
}

impl ProbeOutcome {
    /// A 2xx response arrived within `elapsed_ms`.
    pub fn success(elapsed_ms: u64) -> Self {
        Self {
            latency_ms: Some(elapsed_ms),
            reachability: 1.0,
            gfw_blocked: false,
        }
    }

    /// A non-2xx HTTP response arrived.
    pub fn from_http_status(status: u16) -> Self {
        Self {
            latency_ms: None,
            reachability: 0.0,
            gfw_blocked: status == 403,
        }
    }

    /// The request never completed at the transport level.
    pub fn from_network_error(kind: NetworkErrorKind) -> Self {
        Self {
            latency_ms: None,
            reachability: 0.0,
            gfw_blocked: is_gfw_suspect(kind),
        }
    }
}

/// §4.4: only this named set of transport failures counts as GFW-suspect.
/// A generic/unclassified error (DNS failure, TLS failure, etc.) does not.
fn is_gfw_suspect(kind: NetworkErrorKind) -> bool {
    matches!(
        kind,
        NetworkErrorKind::Abort
            | NetworkErrorKind::ConnectionReset
            | NetworkErrorKind::NetReset
            | NetworkErrorKind::Refused
            | NetworkErrorKind::HostUnreachable
            | NetworkErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_sets_full_reachability() {
        let outcome = ProbeOutcome::success(42);
        assert_eq!(outcome.latency_ms, Some(42));
        assert_eq!(outcome.reachability, 1.0);
        assert!(!outcome.gfw_blocked);
    }

    #[test]
    fn http_403_is_gfw_suspect() {
        let outcome = ProbeOutcome::from_http_status(403);
        assert!(outcome.gfw_blocked);
        assert_eq!(outcome.reachability, 0.0);
    }

    #[test]
    fn http_500_is_not_gfw_suspect() {
        let outcome = ProbeOutcome::from_http_status(500);
        assert!(!outcome.gfw_blocked);
    }

    #[test]
    fn named_network_errors_are_gfw_suspect() {
        for kind in [
            NetworkErrorKind::Abort,
            NetworkErrorKind::ConnectionReset,
            NetworkErrorKind::NetReset,
            NetworkErrorKind::Refused,
            NetworkErrorKind::HostUnreachable,
            NetworkErrorKind::TimedOut,
        ] {
            assert!(ProbeOutcome::from_network_error(kind).gfw_blocked, "{kind:?}");
        }
    }

    #[test]
    fn unclassified_network_error_is_not_gfw_suspect() {
        assert!(!ProbeOutcome::from_network_error(NetworkErrorKind::Other).gfw_blocked);
    }
}
