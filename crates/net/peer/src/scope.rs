//! IP address scope classification and multiaddr surgery.
//!
//! This module provides utilities to classify IP addresses by scope (loopback,
//! private, link-local, CGNAT, public), test for unspecified bindings, and
//! rewrite the IP or transport-port component of a multiaddr. These utilities
//! are used by the address manager to expand unspecified listeners, judge NAT
//! mappings, and combine NAT ports with observed addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;

/// Classification of IP address scope.
///
/// Used to decide which addresses are worth advertising and whether a NAT
/// mapping is trustworthy on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScope {
    /// Loopback addresses (127.0.0.0/8, ::1)
    Loopback,
    /// Private addresses (RFC 1918: 10/8, 172.16/12, 192.168/16; RFC 4193: fc00::/7)
    Private,
    /// Link-local addresses (169.254.0.0/16, fe80::/10)
    LinkLocal,
    /// Carrier-grade NAT addresses (100.64.0.0/10), externally unroutable
    Cgnat,
    /// Public/global addresses (everything else)
    Public,
}

/// Extract the IP address from a multiaddr.
///
/// Returns `None` if the multiaddr doesn't contain an IP protocol.
pub fn extract_ip(addr: &Multiaddr) -> Option<IpAddr> {
    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(ip) => return Some(IpAddr::V4(ip)),
            Protocol::Ip6(ip) => return Some(IpAddr::V6(ip)),
            _ => continue,
        }
    }
    None
}

/// Classify the scope of an IP address.
///
/// Returns `None` for unspecified addresses (0.0.0.0, ::) that are not routable.
fn classify_ip(ip: IpAddr) -> Option<AddressScope> {
    match ip {
        IpAddr::V4(ipv4) => classify_ipv4(ipv4),
        IpAddr::V6(ipv6) => classify_ipv6(ipv6),
    }
}

/// 100.64.0.0/10, the shared address space used behind carrier-grade NAT.
fn is_cgnat_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (64..128).contains(&octets[1])
}

fn classify_ipv4(ip: Ipv4Addr) -> Option<AddressScope> {
    if ip.is_unspecified() || ip.is_broadcast() {
        // 0.0.0.0 and 255.255.255.255 are not routable
        None
    } else if ip.is_loopback() {
        Some(AddressScope::Loopback)
    } else if ip.is_private() {
        Some(AddressScope::Private)
    } else if ip.is_link_local() {
        Some(AddressScope::LinkLocal)
    } else if is_cgnat_ipv4(ip) {
        Some(AddressScope::Cgnat)
    } else {
        Some(AddressScope::Public)
    }
}

fn classify_ipv6(ip: Ipv6Addr) -> Option<AddressScope> {
    if ip.is_unspecified() {
        // :: is not routable
        None
    } else if ip.is_loopback() {
        Some(AddressScope::Loopback)
    } else if ip.is_unique_local() {
        // RFC 4193: fc00::/7 (unique local addresses)
        Some(AddressScope::Private)
    } else if ip.is_unicast_link_local() {
        // fe80::/10
        Some(AddressScope::LinkLocal)
    } else {
        Some(AddressScope::Public)
    }
}

/// Classify the scope of an address in a multiaddr.
///
/// Returns `None` if the multiaddr doesn't contain an IP address or
/// if the IP is unspecified (0.0.0.0, ::).
pub fn classify_multiaddr(addr: &Multiaddr) -> Option<AddressScope> {
    extract_ip(addr).and_then(classify_ip)
}

/// Whether the multiaddr's IP is publicly routable.
///
/// CGNAT addresses are externally unroutable and do not count as public.
pub fn is_public(addr: &Multiaddr) -> bool {
    classify_multiaddr(addr) == Some(AddressScope::Public)
}

/// Whether the multiaddr binds the unspecified address (0.0.0.0 or ::).
pub fn is_ip_unspecified(addr: &Multiaddr) -> bool {
    matches!(extract_ip(addr), Some(ip) if ip.is_unspecified())
}

/// Whether the multiaddr contains a TCP component.
pub fn is_tcp(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::Tcp(_)))
}

/// Whether the multiaddr contains a UDP component.
pub fn is_udp(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::Udp(_)))
}

/// Whether the multiaddr is a circuit-relay address.
pub fn is_circuit(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Replace the IP component of a multiaddr.
///
/// Returns `None` if the multiaddr has no IP component of the same family;
/// IPv4 and IPv6 never substitute for one another.
pub fn replace_ip(addr: &Multiaddr, ip: IpAddr) -> Option<Multiaddr> {
    let mut replaced = false;
    let out: Multiaddr = addr
        .iter()
        .map(|p| match (p, ip) {
            (Protocol::Ip4(_), IpAddr::V4(v4)) => {
                replaced = true;
                Protocol::Ip4(v4)
            }
            (Protocol::Ip6(_), IpAddr::V6(v6)) => {
                replaced = true;
                Protocol::Ip6(v6)
            }
            (p, _) => p,
        })
        .collect();
    replaced.then_some(out)
}

/// The multiaddr with its IP replaced by the unspecified address of the same family.
pub fn unspecified_form(addr: &Multiaddr) -> Option<Multiaddr> {
    match extract_ip(addr)? {
        IpAddr::V4(_) => replace_ip(addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        IpAddr::V6(_) => replace_ip(addr, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    }
}

/// The port of the first TCP or UDP component, if any.
pub fn transport_port(addr: &Multiaddr) -> Option<u16> {
    addr.iter().find_map(|p| match p {
        Protocol::Tcp(port) | Protocol::Udp(port) => Some(port),
        _ => None,
    })
}

/// Replace the port of the first TCP or UDP component.
///
/// Returns `None` if the multiaddr has no transport port.
pub fn replace_port(addr: &Multiaddr, port: u16) -> Option<Multiaddr> {
    let mut replaced = false;
    let out: Multiaddr = addr
        .iter()
        .map(|p| match p {
            Protocol::Tcp(_) if !replaced => {
                replaced = true;
                Protocol::Tcp(port)
            }
            Protocol::Udp(_) if !replaced => {
                replaced = true;
                Protocol::Udp(port)
            }
            p => p,
        })
        .collect();
    replaced.then_some(out)
}
