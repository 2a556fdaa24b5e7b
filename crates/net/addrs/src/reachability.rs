//! Probe-driven reachability classification of the host's direct addresses.
//!
//! A background driver keeps every address of the current direct set in one
//! of three partitions: reachable, unreachable, unknown. Unknown addresses
//! are probed through the [`AutoNatClient`] with bounded concurrency and a
//! jittered start; verdicts are sticky until the address leaves the direct
//! set. Failed probes keep the address unknown and re-arm it after a retry
//! delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libp2p::Multiaddr;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::events::{HostEvents, HostReachableAddrsChanged};
use crate::manager::shutdown_signalled;
use crate::metrics::AddrsManagerMetrics;
use crate::store::AddrsStore;
use crate::traits::{AutoNatClient, ProbeError, ProbeRequest, ProbeResult};

/// Per-address dialability verdict from external probing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddrReachability {
    /// The address was dialed back successfully.
    Reachable,
    /// The address could not be dialed from the outside.
    Unreachable,
    /// No conclusive probe yet.
    #[default]
    Unknown,
}

/// Host-wide reachability hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostReachability {
    /// The host is reachable directly.
    Public,
    /// The host sits behind a NAT or firewall and needs relays.
    Private,
    /// Not yet determined.
    #[default]
    Unknown,
}

#[derive(Debug, Default)]
struct AddrEntry {
    class: AddrReachability,
    in_flight: bool,
    /// Earliest instant the next probe may start, set after a failure.
    not_before: Option<Instant>,
}

type Partitions = (Vec<Multiaddr>, Vec<Multiaddr>, Vec<Multiaddr>);

type ProbeOutcome = (Multiaddr, Result<ProbeResult, ProbeError>);

/// Driver state for reachability tracking. Consumed by [`run`](Self::run).
pub(crate) struct ReachabilityTracker {
    pub(crate) client: Arc<dyn AutoNatClient>,
    pub(crate) addrs_rx: watch::Receiver<Vec<Multiaddr>>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    pub(crate) store: Arc<AddrsStore>,
    pub(crate) events: HostEvents,
    pub(crate) max_concurrent_probes: usize,
    pub(crate) probe_jitter: Duration,
    pub(crate) probe_retry_delay: Duration,
    pub(crate) metrics: AddrsManagerMetrics,
}

impl ReachabilityTracker {
    pub(crate) async fn run(mut self) {
        let (results_tx, mut results_rx) =
            mpsc::channel::<ProbeOutcome>(self.max_concurrent_probes.max(1));
        let mut entries: HashMap<Multiaddr, AddrEntry> = HashMap::new();
        let mut order: Vec<Multiaddr> = Vec::new();
        let mut in_flight = 0usize;
        let mut last: Partitions = Default::default();

        // seed from whatever the update loop has already published
        let initial = self.addrs_rx.borrow_and_update().clone();
        sync_addrs(&mut entries, &mut order, initial);
        self.maybe_publish(&entries, &order, &mut last);

        loop {
            self.schedule_probes(&mut entries, &order, &mut in_flight, &results_tx);
            let retry_at = next_retry(&entries, in_flight, self.max_concurrent_probes);

            tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown_rx) => break,
                Some((addr, res)) = results_rx.recv() => {
                    in_flight -= 1;
                    self.apply_result(&mut entries, addr, res);
                    // drain whatever else already finished before emitting
                    while let Ok((addr, res)) = results_rx.try_recv() {
                        in_flight -= 1;
                        self.apply_result(&mut entries, addr, res);
                    }
                    self.maybe_publish(&entries, &order, &mut last);
                }
                changed = self.addrs_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let new = self.addrs_rx.borrow_and_update().clone();
                    sync_addrs(&mut entries, &mut order, new);
                    self.maybe_publish(&entries, &order, &mut last);
                }
                _ = sleep_until_maybe(retry_at) => {}
            }
        }
        debug!("reachability tracker shutting down");
    }

    fn schedule_probes(
        &self,
        entries: &mut HashMap<Multiaddr, AddrEntry>,
        order: &[Multiaddr],
        in_flight: &mut usize,
        results_tx: &mpsc::Sender<ProbeOutcome>,
    ) {
        let now = Instant::now();
        for addr in order {
            if *in_flight >= self.max_concurrent_probes {
                break;
            }
            let Some(entry) = entries.get_mut(addr) else { continue };
            if entry.class != AddrReachability::Unknown || entry.in_flight {
                continue;
            }
            if entry.not_before.is_some_and(|t| t > now) {
                continue;
            }
            entry.in_flight = true;
            *in_flight += 1;
            self.spawn_probe(addr.clone(), results_tx.clone());
        }
    }

    fn spawn_probe(&self, addr: Multiaddr, results_tx: mpsc::Sender<ProbeOutcome>) {
        self.metrics.probes_total.increment(1);
        let client = self.client.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let jitter_ms = self.probe_jitter.as_millis() as u64;
        tokio::spawn(async move {
            let delay = if jitter_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
            };
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown_rx) => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let requests = [ProbeRequest {
                addr: addr.clone(),
                send_dial_data: true,
            }];
            tokio::select! {
                // a result arriving after shutdown is discarded with the channel
                _ = shutdown_signalled(&mut shutdown_rx) => {}
                res = client.probe(&requests) => {
                    let _ = results_tx.send((addr, res)).await;
                }
            }
        });
    }

    fn apply_result(
        &self,
        entries: &mut HashMap<Multiaddr, AddrEntry>,
        addr: Multiaddr,
        res: Result<ProbeResult, ProbeError>,
    ) {
        let Some(entry) = entries.get_mut(&addr) else {
            trace!(addr = %addr, "probe result for address no longer tracked");
            return;
        };
        entry.in_flight = false;
        match res {
            Ok(result) => match result.reachability {
                AddrReachability::Unknown => {
                    trace!(addr = %addr, "probe inconclusive");
                    entry.not_before = Some(Instant::now() + self.probe_retry_delay);
                }
                class => {
                    debug!(addr = %addr, ?class, "address classified");
                    entry.class = class;
                }
            },
            Err(err) => {
                warn!(addr = %addr, error = %err, "reachability probe failed");
                self.metrics.probe_errors_total.increment(1);
                entry.not_before = Some(Instant::now() + self.probe_retry_delay);
            }
        }
    }

    fn maybe_publish(
        &self,
        entries: &HashMap<Multiaddr, AddrEntry>,
        order: &[Multiaddr],
        last: &mut Partitions,
    ) {
        let parts = partitions(entries, order);
        if parts == *last {
            return;
        }
        *last = parts.clone();
        let (reachable, unreachable, unknown) = parts;
        self.metrics.reachable_addrs.set(reachable.len() as f64);
        self.metrics.unreachable_addrs.set(unreachable.len() as f64);
        self.metrics.unknown_addrs.set(unknown.len() as f64);
        debug!(
            reachable = reachable.len(),
            unreachable = unreachable.len(),
            unknown = unknown.len(),
            "reachable address partitions changed"
        );
        self.store
            .publish_confirmed(reachable.clone(), unreachable.clone(), unknown.clone());
        self.events.emit_reachable_addrs(HostReachableAddrsChanged {
            reachable,
            unreachable,
            unknown,
        });
    }
}

fn sync_addrs(
    entries: &mut HashMap<Multiaddr, AddrEntry>,
    order: &mut Vec<Multiaddr>,
    new: Vec<Multiaddr>,
) {
    entries.retain(|addr, _| new.contains(addr));
    for addr in &new {
        entries.entry(addr.clone()).or_default();
    }
    *order = new;
}

fn partitions(entries: &HashMap<Multiaddr, AddrEntry>, order: &[Multiaddr]) -> Partitions {
    let mut reachable = Vec::new();
    let mut unreachable = Vec::new();
    let mut unknown = Vec::new();
    for addr in order {
        match entries.get(addr).map(|e| e.class) {
            Some(AddrReachability::Reachable) => reachable.push(addr.clone()),
            Some(AddrReachability::Unreachable) => unreachable.push(addr.clone()),
            Some(AddrReachability::Unknown) => unknown.push(addr.clone()),
            None => {}
        }
    }
    (reachable, unreachable, unknown)
}

/// Earliest instant a backed-off address becomes probeable again, if a probe
/// slot could take it.
fn next_retry(
    entries: &HashMap<Multiaddr, AddrEntry>,
    in_flight: usize,
    max_concurrent: usize,
) -> Option<Instant> {
    if in_flight >= max_concurrent {
        return None;
    }
    entries
        .values()
        .filter(|e| e.class == AddrReachability::Unknown && !e.in_flight)
        .filter_map(|e| e.not_before)
        .min()
}

async fn sleep_until_maybe(deadline: Option<Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(t).await,
        None => std::future::pending().await,
    }
}
