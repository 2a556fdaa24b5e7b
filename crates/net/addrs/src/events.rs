//! Host address events and their plumbing.
//!
//! Relay-address and local-reachability updates are carried on `watch`
//! channels: the latest value is replayed to every new subscriber, so a
//! consumer that attaches late still sees current state. Reachability
//! partition changes go out through a non-blocking broadcast emitter; slow
//! subscribers drop events independently.

use libp2p::Multiaddr;
use tokio::sync::{broadcast, watch};

use crate::reachability::HostReachability;

/// The relay subsystem published a new set of circuit addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoRelayAddrsUpdated {
    /// Circuit addresses of the form `<relay>/p2p/<id>/p2p-circuit`.
    pub relay_addrs: Vec<Multiaddr>,
}

/// The host-wide reachability verdict changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalReachabilityChanged {
    /// The new host-wide hint.
    pub reachability: HostReachability,
}

/// The reachability partition of the host's direct addresses changed.
///
/// Emitted on first population (everything `Unknown`) and on every
/// subsequent change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostReachableAddrsChanged {
    /// Addresses confirmed dialable from the outside.
    pub reachable: Vec<Multiaddr>,
    /// Addresses confirmed not dialable.
    pub unreachable: Vec<Multiaddr>,
    /// Addresses not yet probed conclusively.
    pub unknown: Vec<Multiaddr>,
}

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Event plumbing shared between the address manager and the rest of the host.
///
/// Clones share the underlying channels.
#[derive(Debug, Clone)]
pub struct HostEvents {
    relay_tx: watch::Sender<AutoRelayAddrsUpdated>,
    reachability_tx: watch::Sender<LocalReachabilityChanged>,
    reachable_addrs_tx: broadcast::Sender<HostReachableAddrsChanged>,
}

impl Default for HostEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEvents {
    pub fn new() -> Self {
        let (relay_tx, _) = watch::channel(AutoRelayAddrsUpdated::default());
        let (reachability_tx, _) = watch::channel(LocalReachabilityChanged::default());
        let (reachable_addrs_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            relay_tx,
            reachability_tx,
            reachable_addrs_tx,
        }
    }

    /// Publish a new set of relay circuit addresses.
    pub fn publish_relay_addrs(&self, relay_addrs: Vec<Multiaddr>) {
        self.relay_tx.send_replace(AutoRelayAddrsUpdated { relay_addrs });
    }

    /// Publish a new host-wide reachability verdict.
    pub fn publish_local_reachability(&self, reachability: HostReachability) {
        self.reachability_tx
            .send_replace(LocalReachabilityChanged { reachability });
    }

    /// Subscribe to relay-address updates. The current value is replayed.
    pub fn subscribe_relay_addrs(&self) -> watch::Receiver<AutoRelayAddrsUpdated> {
        self.relay_tx.subscribe()
    }

    /// Subscribe to host-wide reachability updates. The current value is replayed.
    pub fn subscribe_local_reachability(&self) -> watch::Receiver<LocalReachabilityChanged> {
        self.reachability_tx.subscribe()
    }

    /// Subscribe to reachability partition changes.
    pub fn subscribe_reachable_addrs(&self) -> broadcast::Receiver<HostReachableAddrsChanged> {
        self.reachable_addrs_tx.subscribe()
    }

    pub(crate) fn emit_reachable_addrs(&self, event: HostReachableAddrsChanged) {
        let _ = self.reachable_addrs_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stateful_replay() {
        let events = HostEvents::new();
        let relay: Multiaddr = "/ip4/1.2.3.4/udp/1/quic-v1/p2p/QmdXGaeGiVA745XorV1jr11RHxB9z4fqykm6xCUPX1aTJo/p2p-circuit"
            .parse()
            .unwrap();
        events.publish_relay_addrs(vec![relay.clone()]);
        events.publish_local_reachability(HostReachability::Private);

        // subscribers attached after the publish still see the latest value
        let relay_rx = events.subscribe_relay_addrs();
        assert_eq!(relay_rx.borrow().relay_addrs, vec![relay]);
        let rch_rx = events.subscribe_local_reachability();
        assert_eq!(rch_rx.borrow().reachability, HostReachability::Private);
    }

    #[tokio::test]
    async fn test_reachable_addrs_broadcast() {
        let events = HostEvents::new();
        let mut rx = events.subscribe_reachable_addrs();

        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/1".parse().unwrap();
        events.emit_reachable_addrs(HostReachableAddrsChanged {
            unknown: vec![addr.clone()],
            ..Default::default()
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.unknown, vec![addr]);
        assert!(event.reachable.is_empty());
        assert!(event.unreachable.is_empty());
    }

    #[test]
    fn test_emit_without_subscribers() {
        let events = HostEvents::new();
        // must not panic or block
        events.emit_reachable_addrs(HostReachableAddrsChanged::default());
    }
}
