//! Protocol-agnostic network utilities for libp2p.
//!
//! - [`scope`] - IP address classification (loopback, private, link-local, CGNAT, public)
//!   and multiaddr surgery (IP/port substitution, protocol membership)
//! - [`interfaces`] - System interface enumeration as IP-only multiaddrs

pub mod interfaces;
pub mod scope;

pub use interfaces::interface_multiaddrs;
pub use scope::{
    classify_multiaddr, extract_ip, is_circuit, is_ip_unspecified, is_public, is_tcp, is_udp,
    replace_ip, replace_port, transport_port, unspecified_form, AddressScope,
};
