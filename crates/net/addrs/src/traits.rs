//! Collaborator interfaces consumed by the address manager.
//!
//! The address manager never dials, listens or probes by itself; these traits
//! are the seams through which the transport layer, the NAT mapper, the
//! identify-derived observed-address collector and the autonat prober feed it.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::Multiaddr;
use thiserror::Error;

use crate::reachability::AddrReachability;

/// Upstream NAT port mapper.
pub trait NatManager: Send + Sync {
    /// The external multiaddr the NAT reports for a listen address, if any.
    ///
    /// The result may itself have an unspecified IP when the NAT only knows
    /// the external port.
    fn mapping(&self, listen: &Multiaddr) -> Option<Multiaddr>;

    /// Whether a NAT device has been discovered upstream.
    fn has_discovered_nat(&self) -> bool;

    /// Release any resources held by the mapper.
    fn close(&self) {}
}

/// Collector of addresses remote peers report having seen us at.
pub trait ObservedAddrsManager: Send + Sync {
    /// All observed addresses, across every listener.
    fn own_observed_addrs(&self) -> Vec<Multiaddr>;

    /// Observed addresses recorded against a local listen address.
    fn observed_addrs_for(&self, local: &Multiaddr) -> Vec<Multiaddr>;
}

/// Source of the host's currently bound listen addresses.
pub trait ListenAddrsProvider: Send + Sync {
    /// The addresses the host is actively listening on.
    fn listen_addrs(&self) -> Vec<Multiaddr>;
}

impl<F> ListenAddrsProvider for F
where
    F: Fn() -> Vec<Multiaddr> + Send + Sync,
{
    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self()
    }
}

/// Source of local interface addresses, used to expand unspecified listeners.
pub trait InterfaceAddrsProvider: Send + Sync {
    /// IP-only multiaddrs for the local interfaces.
    fn interface_addrs(&self) -> Vec<Multiaddr>;
}

impl<F> InterfaceAddrsProvider for F
where
    F: Fn() -> Vec<Multiaddr> + Send + Sync,
{
    fn interface_addrs(&self) -> Vec<Multiaddr> {
        self()
    }
}

/// Interface enumeration backed by the system's network interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceAddrsProvider for SystemInterfaces {
    fn interface_addrs(&self) -> Vec<Multiaddr> {
        weft_net_peer::interface_multiaddrs()
    }
}

/// User-supplied transform applied to the advertised address set.
///
/// The factory's output replaces the candidate set entirely; returning an
/// empty set is a valid "advertise nothing". It is invoked on the update-loop
/// task and must not block.
pub type AddrsFactory = Arc<dyn Fn(Vec<Multiaddr>) -> Vec<Multiaddr> + Send + Sync>;

/// A single address to probe for external reachability.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// The address the probe server should dial back.
    pub addr: Multiaddr,
    /// Whether we are willing to send amplification-protection dial data.
    pub send_dial_data: bool,
}

/// Outcome of a probe for one of the requested addresses.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// The address the verdict applies to.
    pub addr: Multiaddr,
    /// Index of that address in the request slice.
    pub idx: usize,
    /// The dialability verdict.
    pub reachability: AddrReachability,
}

/// Errors from the probe client.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No probe server was available to run the request.
    #[error("no probe peers available")]
    NoPeers,
    /// The probe ran but produced no usable verdict.
    #[error("probe failed: {0}")]
    Failed(String),
}

/// Client for external reachability probes (autonat v2 style).
#[async_trait]
pub trait AutoNatClient: Send + Sync {
    /// Probe the given addresses, returning the verdict for the first
    /// address the server agreed to dial.
    async fn probe(&self, requests: &[ProbeRequest]) -> Result<ProbeResult, ProbeError>;
}
