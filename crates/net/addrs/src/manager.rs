//! The address manager: a single-writer update loop over the host's
//! address sources.
//!
//! Triggers (periodic tick, listener changes, relay updates, reachability
//! updates, explicit syncs) all funnel into one task that re-synthesizes the
//! candidate set, diffs it against the last published state and swaps in a
//! new snapshot. Readers never block the loop; the reachability tracker is
//! fed the direct set whenever it changes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libp2p::Multiaddr;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use weft_net_peer::is_public;

use crate::candidates::{self, are_addrs_different, dedup, push_unique};
use crate::error::AddrsManagerError;
use crate::events::{AutoRelayAddrsUpdated, HostEvents, LocalReachabilityChanged};
use crate::metrics::AddrsManagerMetrics;
use crate::reachability::{HostReachability, ReachabilityTracker};
use crate::store::AddrsStore;
use crate::traits::{
    AddrsFactory, AutoNatClient, InterfaceAddrsProvider, ListenAddrsProvider, NatManager,
    ObservedAddrsManager, SystemInterfaces,
};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 3;
const DEFAULT_PROBE_JITTER: Duration = Duration::from_millis(500);
const DEFAULT_PROBE_RETRY_DELAY: Duration = Duration::from_secs(30);

const TRIGGER_CHANNEL_CAPACITY: usize = 16;

/// Address manager configuration.
#[derive(Debug, Clone)]
pub struct AddrsManagerConfig {
    /// Cadence of unsolicited recomputes.
    pub update_interval: Duration,
    /// Cap on concurrently running reachability probes.
    pub max_concurrent_probes: usize,
    /// Maximum random delay before each probe starts.
    pub probe_jitter: Duration,
    /// How long a failed probe keeps an address off the probe queue.
    pub probe_retry_delay: Duration,
}

impl Default for AddrsManagerConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            probe_jitter: DEFAULT_PROBE_JITTER,
            probe_retry_delay: DEFAULT_PROBE_RETRY_DELAY,
        }
    }
}

enum Trigger {
    ListenersChanged,
    Sync(oneshot::Sender<()>),
}

/// Manages the set of addresses the host is reachable at.
///
/// Created stopped; [`start`](Self::start) spawns the update loop (and the
/// reachability tracker when a probe client is configured),
/// [`close`](Self::close) shuts both down. Reads are served from an
/// immutable snapshot and never block the loop.
pub struct AddrsManager {
    config: AddrsManagerConfig,
    events: HostEvents,
    store: Arc<AddrsStore>,
    listen: Arc<dyn ListenAddrsProvider>,
    ifaces: Arc<dyn InterfaceAddrsProvider>,
    nat: Option<Arc<dyn NatManager>>,
    observed: Option<Arc<dyn ObservedAddrsManager>>,
    factory: Option<AddrsFactory>,
    autonat: Option<Arc<dyn AutoNatClient>>,
    trigger_tx: mpsc::Sender<Trigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<Trigger>>>,
    direct_tx: watch::Sender<Vec<Multiaddr>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    metrics: AddrsManagerMetrics,
}

impl fmt::Debug for AddrsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddrsManager")
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AddrsManager {
    /// Create a stopped manager with default configuration.
    pub fn new(events: HostEvents, listen: Arc<dyn ListenAddrsProvider>) -> Self {
        Self::with_config(events, listen, AddrsManagerConfig::default())
    }

    /// Create a stopped manager with custom configuration.
    pub fn with_config(
        events: HostEvents,
        listen: Arc<dyn ListenAddrsProvider>,
        config: AddrsManagerConfig,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let (direct_tx, _) = watch::channel(Vec::new());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            events,
            store: Arc::new(AddrsStore::new()),
            listen,
            ifaces: Arc::new(SystemInterfaces),
            nat: None,
            observed: None,
            factory: None,
            autonat: None,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            direct_tx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            metrics: AddrsManagerMetrics::default(),
        }
    }

    /// Attach a NAT port mapper.
    pub fn with_nat_manager(mut self, nat: Arc<dyn NatManager>) -> Self {
        self.nat = Some(nat);
        self
    }

    /// Attach an observed-address collector.
    pub fn with_observed_addrs(mut self, observed: Arc<dyn ObservedAddrsManager>) -> Self {
        self.observed = Some(observed);
        self
    }

    /// Override the interface enumerator (defaults to the system interfaces).
    pub fn with_interface_addrs(mut self, ifaces: Arc<dyn InterfaceAddrsProvider>) -> Self {
        self.ifaces = ifaces;
        self
    }

    /// Attach a transform applied to the advertised set.
    pub fn with_addrs_factory(mut self, factory: AddrsFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Attach a reachability probe client.
    pub fn with_autonat_client(mut self, client: Arc<dyn AutoNatClient>) -> Self {
        self.autonat = Some(client);
        self
    }

    /// Spawn the update loop and, if a probe client is configured, the
    /// reachability tracker. The store is populated synchronously before
    /// this returns. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), AddrsManagerError> {
        let Some(trigger_rx) = self.trigger_rx.lock().take() else {
            return Err(AddrsManagerError::AlreadyStarted);
        };
        self.started.store(true, Ordering::SeqCst);

        let mut worker = UpdateWorker {
            store: self.store.clone(),
            listen: self.listen.clone(),
            ifaces: self.ifaces.clone(),
            nat: self.nat.clone(),
            observed: self.observed.clone(),
            factory: self.factory.clone(),
            metrics: self.metrics.clone(),
            update_interval: self.config.update_interval,
            relay_rx: self.events.subscribe_relay_addrs(),
            reachability_rx: self.events.subscribe_local_reachability(),
            trigger_rx,
            shutdown_rx: self.shutdown_tx.subscribe(),
            direct_tx: self.direct_tx.clone(),
            last_direct: Vec::new(),
            last_advertised: Vec::new(),
        };
        worker.refresh();

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(worker.run()));

        if let Some(client) = &self.autonat {
            let tracker = ReachabilityTracker {
                client: client.clone(),
                addrs_rx: self.direct_tx.subscribe(),
                shutdown_rx: self.shutdown_tx.subscribe(),
                store: self.store.clone(),
                events: self.events.clone(),
                max_concurrent_probes: self.config.max_concurrent_probes,
                probe_jitter: self.config.probe_jitter,
                probe_retry_delay: self.config.probe_retry_delay,
                metrics: self.metrics.clone(),
            };
            tasks.push(tokio::spawn(tracker.run()));
        }
        Ok(())
    }

    /// Shut down the update loop, the tracker and any in-flight probes.
    /// Idempotent; results arriving after shutdown are discarded.
    pub async fn close(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock();
            guard.drain(..).collect()
        };
        if tasks.is_empty() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        for task in tasks {
            let _ = task.await;
        }
        if let Some(nat) = &self.nat {
            nat.close();
        }
    }

    /// The advertised address set: the factory's view of the candidate set.
    pub fn addrs(&self) -> Vec<Multiaddr> {
        self.store.addrs()
    }

    /// The host's own addresses, pre-factory and with relays excluded.
    pub fn direct_addrs(&self) -> Vec<Multiaddr> {
        self.store.direct_addrs()
    }

    /// The reachability partitions `(reachable, unreachable, unknown)` of
    /// the direct set.
    pub fn confirmed_addrs(&self) -> (Vec<Multiaddr>, Vec<Multiaddr>, Vec<Multiaddr>) {
        self.store.confirmed_addrs()
    }

    /// A coalescing change signal, poked on every snapshot publish.
    pub fn update_chan(&self) -> watch::Receiver<()> {
        self.store.update_chan()
    }

    /// Tell the manager the transport layer's listeners changed.
    pub fn notify_listeners_changed(&self) {
        // coalesces with whatever is already queued
        let _ = self.trigger_tx.try_send(Trigger::ListenersChanged);
    }

    /// Force a recompute and wait until the store reflects it.
    pub(crate) async fn update_addrs_sync(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.trigger_tx.send(Trigger::Sync(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Resolves once the shutdown watch carries `true` or its sender is gone.
pub(crate) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct UpdateWorker {
    store: Arc<AddrsStore>,
    listen: Arc<dyn ListenAddrsProvider>,
    ifaces: Arc<dyn InterfaceAddrsProvider>,
    nat: Option<Arc<dyn NatManager>>,
    observed: Option<Arc<dyn ObservedAddrsManager>>,
    factory: Option<AddrsFactory>,
    metrics: AddrsManagerMetrics,
    update_interval: Duration,
    relay_rx: watch::Receiver<AutoRelayAddrsUpdated>,
    reachability_rx: watch::Receiver<LocalReachabilityChanged>,
    trigger_rx: mpsc::Receiver<Trigger>,
    shutdown_rx: watch::Receiver<bool>,
    direct_tx: watch::Sender<Vec<Multiaddr>>,
    last_direct: Vec<Multiaddr>,
    last_advertised: Vec<Multiaddr>,
}

impl UpdateWorker {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.update_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the store was populated synchronously at start
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown_rx) => break,
                trigger = self.trigger_rx.recv() => match trigger {
                    Some(Trigger::Sync(done)) => {
                        self.refresh();
                        let _ = done.send(());
                    }
                    Some(Trigger::ListenersChanged) => self.refresh(),
                    None => break,
                },
                changed = self.relay_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.refresh();
                }
                changed = self.reachability_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.refresh();
                }
                _ = tick.tick() => self.refresh(),
            }
        }
        debug!("address update loop shutting down");
    }

    /// One pass of the synthesize → diff → publish pipeline.
    fn refresh(&mut self) {
        let listeners = self.listen.listen_addrs();
        let ifaces = self.ifaces.interface_addrs();
        let relays = self.relay_rx.borrow_and_update().relay_addrs.clone();
        let hint = self.reachability_rx.borrow_and_update().reachability;

        let direct = candidates::direct_addrs(
            &listeners,
            &ifaces,
            self.nat.as_deref(),
            self.observed.as_deref(),
        );
        let advertised = self.advertised(&direct, &relays, hint);

        let direct_changed = are_addrs_different(&self.last_direct, &direct);
        let advertised_changed = are_addrs_different(&self.last_advertised, &advertised);

        if direct_changed || advertised_changed {
            debug!(
                direct = direct.len(),
                advertised = advertised.len(),
                ?hint,
                "host addresses updated"
            );
            self.metrics.advertised_addrs.set(advertised.len() as f64);
            self.store.publish_addrs(advertised.clone(), direct.clone());
        }
        if direct_changed {
            self.direct_tx.send_replace(direct.clone());
        }
        self.last_direct = direct;
        self.last_advertised = advertised;
        self.metrics.updates_total.increment(1);
    }

    /// Assemble the advertised set and run it through the factory.
    fn advertised(
        &self,
        direct: &[Multiaddr],
        relays: &[Multiaddr],
        hint: HostReachability,
    ) -> Vec<Multiaddr> {
        let mut candidate: Vec<Multiaddr> = direct.to_vec();
        if hint == HostReachability::Private {
            // a NATed host advertises relays instead of its public guesses
            candidate.retain(|a| !is_public(a));
            for relay in relays {
                push_unique(&mut candidate, relay.clone());
            }
        }
        let out = match &self.factory {
            Some(factory) => factory(candidate),
            None => candidate,
        };
        dedup(out)
    }
}
