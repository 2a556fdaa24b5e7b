//! System interface enumeration as IP-only multiaddrs.
//!
//! Uses the `netdev` crate, which supports Linux, macOS, Windows, Android,
//! iOS and the BSDs. The resulting addresses carry only an IP component and
//! are meant to be substituted into unspecified listen addresses.

use std::net::IpAddr;

use libp2p::Multiaddr;
use tracing::{trace, warn};

/// Enumerate the IP addresses of all interfaces that are up.
///
/// Loopback addresses are included (an unspecified listener is reachable on
/// loopback too); link-local addresses are skipped since they are not usable
/// without scope information.
pub fn interface_multiaddrs() -> Vec<Multiaddr> {
    let mut out: Vec<Multiaddr> = Vec::new();

    for iface in netdev::get_interfaces() {
        if !iface.is_up() {
            trace!(interface = %iface.name, "skipping down interface");
            continue;
        }

        for ipv4_net in &iface.ipv4 {
            let ip = ipv4_net.addr;
            if ip.is_link_local() {
                continue;
            }
            push_ip(&mut out, IpAddr::V4(ip));
        }

        for ipv6_net in &iface.ipv6 {
            let ip = ipv6_net.addr;
            if ip.is_unicast_link_local() {
                continue;
            }
            push_ip(&mut out, IpAddr::V6(ip));
        }
    }

    if out.is_empty() {
        warn!("no interface addresses discovered - interface query may have failed");
    }

    out
}

fn push_ip(out: &mut Vec<Multiaddr>, ip: IpAddr) {
    let addr = Multiaddr::from(ip);
    if !out.contains(&addr) {
        out.push(addr);
    }
}
