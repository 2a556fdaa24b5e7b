//! Snapshot store for the host's address state.
//!
//! A single cell holding an immutable snapshot behind an `Arc`: writers build
//! the next snapshot and swap it in, readers clone the `Arc` and never see a
//! torn state. Every publish pokes a watch channel; the watch coalesces
//! notifications, which is the intended capacity-1 signal behavior.

use std::sync::Arc;

use libp2p::Multiaddr;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::candidates::remove_not_in_source;

/// One consistent view of the host's addresses.
#[derive(Debug, Clone, Default)]
pub(crate) struct AddrsSnapshot {
    /// The advertised set, post-factory.
    pub(crate) advertised: Vec<Multiaddr>,
    /// The direct set: pre-factory, relays excluded.
    pub(crate) direct: Vec<Multiaddr>,
    /// Direct addresses confirmed dialable.
    pub(crate) reachable: Vec<Multiaddr>,
    /// Direct addresses confirmed not dialable.
    pub(crate) unreachable: Vec<Multiaddr>,
    /// Direct addresses without a verdict.
    pub(crate) unknown: Vec<Multiaddr>,
}

#[derive(Debug)]
pub(crate) struct AddrsStore {
    snapshot: RwLock<Arc<AddrsSnapshot>>,
    update_tx: watch::Sender<()>,
}

impl AddrsStore {
    pub(crate) fn new() -> Self {
        let (update_tx, _) = watch::channel(());
        Self {
            snapshot: RwLock::new(Arc::new(AddrsSnapshot::default())),
            update_tx,
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<AddrsSnapshot> {
        self.snapshot.read().clone()
    }

    pub(crate) fn addrs(&self) -> Vec<Multiaddr> {
        self.snapshot().advertised.clone()
    }

    pub(crate) fn direct_addrs(&self) -> Vec<Multiaddr> {
        self.snapshot().direct.clone()
    }

    pub(crate) fn confirmed_addrs(&self) -> (Vec<Multiaddr>, Vec<Multiaddr>, Vec<Multiaddr>) {
        let snapshot = self.snapshot();
        (
            snapshot.reachable.clone(),
            snapshot.unreachable.clone(),
            snapshot.unknown.clone(),
        )
    }

    /// A change signal; poked on every publish, coalescing by design of the
    /// watch channel.
    pub(crate) fn update_chan(&self) -> watch::Receiver<()> {
        self.update_tx.subscribe()
    }

    /// Publish a new advertised/direct pair.
    ///
    /// The confirmed partitions are trimmed against the new direct set so
    /// that they never reference an address the host no longer claims.
    pub(crate) fn publish_addrs(&self, advertised: Vec<Multiaddr>, direct: Vec<Multiaddr>) {
        {
            let mut guard = self.snapshot.write();
            let mut next = AddrsSnapshot::clone(&guard);
            next.reachable = remove_not_in_source(std::mem::take(&mut next.reachable), &direct);
            next.unreachable = remove_not_in_source(std::mem::take(&mut next.unreachable), &direct);
            next.unknown = remove_not_in_source(std::mem::take(&mut next.unknown), &direct);
            next.advertised = advertised;
            next.direct = direct;
            *guard = Arc::new(next);
        }
        self.update_tx.send_replace(());
    }

    /// Publish new confirmed partitions.
    pub(crate) fn publish_confirmed(
        &self,
        reachable: Vec<Multiaddr>,
        unreachable: Vec<Multiaddr>,
        unknown: Vec<Multiaddr>,
    ) {
        {
            let mut guard = self.snapshot.write();
            let mut next = AddrsSnapshot::clone(&guard);
            next.reachable = reachable;
            next.unreachable = unreachable;
            next.unknown = unknown;
            *guard = Arc::new(next);
        }
        self.update_tx.send_replace(());
    }
}
