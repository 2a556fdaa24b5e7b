//! Address manager metrics.

use metrics::{Counter, Gauge};

/// Metric handles for the address manager.
///
/// Registration happens against whatever recorder the embedding process has
/// installed; the manager itself holds only the handles.
#[derive(Clone)]
pub(crate) struct AddrsManagerMetrics {
    /// Number of update-loop passes.
    pub(crate) updates_total: Counter,
    /// Number of reachability probes launched.
    pub(crate) probes_total: Counter,
    /// Number of reachability probes that failed.
    pub(crate) probe_errors_total: Counter,
    /// Size of the advertised address set.
    pub(crate) advertised_addrs: Gauge,
    /// Number of addresses confirmed reachable.
    pub(crate) reachable_addrs: Gauge,
    /// Number of addresses confirmed unreachable.
    pub(crate) unreachable_addrs: Gauge,
    /// Number of addresses with no verdict yet.
    pub(crate) unknown_addrs: Gauge,
}

impl std::fmt::Debug for AddrsManagerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddrsManagerMetrics").finish_non_exhaustive()
    }
}

impl Default for AddrsManagerMetrics {
    fn default() -> Self {
        Self {
            updates_total: metrics::counter!("host_addrs.updates_total"),
            probes_total: metrics::counter!("host_addrs.probes_total"),
            probe_errors_total: metrics::counter!("host_addrs.probe_errors_total"),
            advertised_addrs: metrics::gauge!("host_addrs.advertised_addrs"),
            reachable_addrs: metrics::gauge!("host_addrs.reachable_addrs"),
            unreachable_addrs: metrics::gauge!("host_addrs.unreachable_addrs"),
            unknown_addrs: metrics::gauge!("host_addrs.unknown_addrs"),
        }
    }
}
