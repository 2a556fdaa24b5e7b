//! Candidate address synthesis.
//!
//! Pure set algebra over the manager's inputs: unspecified listeners expand
//! against interface addresses, NAT mappings and observed addresses combine
//! per listener according to how trustworthy the mapping is, and the result
//! is a de-duplicated direct address set.

use libp2p::Multiaddr;
use tracing::warn;
use weft_net_peer::{
    extract_ip, is_circuit, is_ip_unspecified, is_public, is_udp, replace_ip, replace_port,
    transport_port, unspecified_form,
};

use crate::traits::{NatManager, ObservedAddrsManager};

/// How many observed addresses a single listener may contribute.
///
/// Remote peers can report many distinct addresses for the same listener;
/// the first five in provider order survive.
pub(crate) const MAX_OBSERVED_ADDRS_PER_LISTEN_ADDR: usize = 5;

pub(crate) fn push_unique(out: &mut Vec<Multiaddr>, addr: Multiaddr) {
    if !out.contains(&addr) {
        out.push(addr);
    }
}

/// De-duplicate preserving first-seen order.
pub(crate) fn dedup(addrs: Vec<Multiaddr>) -> Vec<Multiaddr> {
    let mut out = Vec::with_capacity(addrs.len());
    for addr in addrs {
        push_unique(&mut out, addr);
    }
    out
}

/// Set inequality over two address slices.
///
/// The fast path (differing lengths) allocates nothing. Both inputs are
/// assumed de-duplicated, as everything published by the manager is.
pub(crate) fn are_addrs_different(a: &[Multiaddr], b: &[Multiaddr]) -> bool {
    if a.len() != b.len() {
        return true;
    }
    let set: std::collections::HashSet<&Multiaddr> = b.iter().collect();
    a.iter().any(|addr| !set.contains(addr))
}

/// The subsequence of `addrs` whose elements appear in `source`, in order.
pub(crate) fn remove_not_in_source(addrs: Vec<Multiaddr>, source: &[Multiaddr]) -> Vec<Multiaddr> {
    let set: std::collections::HashSet<&Multiaddr> = source.iter().collect();
    addrs.into_iter().filter(|a| set.contains(a)).collect()
}

/// Expand a listen address into its effective bind set.
///
/// A specified listener binds exactly itself; an unspecified one binds every
/// interface address of the same family.
pub(crate) fn expand_unspecified(listen: &Multiaddr, ifaces: &[Multiaddr]) -> Vec<Multiaddr> {
    if !is_ip_unspecified(listen) {
        return vec![listen.clone()];
    }
    let mut out = Vec::new();
    for iface in ifaces {
        let Some(ip) = extract_ip(iface) else { continue };
        // replace_ip refuses cross-family substitution
        if let Some(addr) = replace_ip(listen, ip) {
            push_unique(&mut out, addr);
        }
    }
    out
}

/// Append NAT mappings and observed addresses for every listener.
///
/// The NAT is always queried with the original listen address; the observed
/// manager with each effective bind, and additionally with the unspecified
/// form for UDP listeners (observed QUIC addresses are frequently recorded
/// against the unspecified binding).
pub(crate) fn append_nat_and_observed(
    out: &mut Vec<Multiaddr>,
    listeners: &[Multiaddr],
    ifaces: &[Multiaddr],
    nat: Option<&dyn NatManager>,
    observed: Option<&dyn ObservedAddrsManager>,
) {
    let mut warned_malformed = false;
    for listen in listeners {
        let mapping = nat.and_then(|n| n.mapping(listen));
        let binds = expand_unspecified(listen, ifaces);

        let mut obs_addrs: Vec<Multiaddr> = Vec::new();
        if let Some(observed) = observed {
            for bind in &binds {
                collect_observed(&mut obs_addrs, observed, bind, &mut warned_malformed);
            }
            if is_udp(listen) {
                if let Some(unspec) = unspecified_form(listen) {
                    collect_observed(&mut obs_addrs, observed, &unspec, &mut warned_malformed);
                }
            }
        }
        obs_addrs.truncate(MAX_OBSERVED_ADDRS_PER_LISTEN_ADDR);

        match mapping {
            // no mapping: the observed addresses are all we have
            None => {
                for o in obs_addrs {
                    push_unique(out, o);
                }
            }
            // the NAT knows only the external port; take the address from
            // the observations and the port from the mapping
            Some(m) if is_ip_unspecified(&m) => match transport_port(&m) {
                Some(port) => {
                    for o in obs_addrs {
                        if let Some(addr) = replace_port(&o, port) {
                            push_unique(out, addr);
                        }
                    }
                }
                None => {
                    for o in obs_addrs {
                        push_unique(out, o);
                    }
                }
            },
            // a publicly routable mapping wins outright
            Some(m) if is_public(&m) => {
                push_unique(out, m);
            }
            // CGNAT or otherwise ambiguous mapping: the external address may
            // or may not be dialable, advertise it alongside the observations
            Some(m) => {
                push_unique(out, m);
                for o in obs_addrs {
                    push_unique(out, o);
                }
            }
        }
    }
}

fn collect_observed(
    obs_addrs: &mut Vec<Multiaddr>,
    observed: &dyn ObservedAddrsManager,
    query: &Multiaddr,
    warned: &mut bool,
) {
    for o in observed.observed_addrs_for(query) {
        if extract_ip(&o).is_none() {
            if !*warned {
                warn!(addr = %o, "dropping observed address without IP component");
                *warned = true;
            }
            continue;
        }
        push_unique(obs_addrs, o);
    }
}

/// Synthesize the direct address set: expanded listeners plus NAT and
/// observed contributions, de-duplicated.
pub(crate) fn direct_addrs(
    listeners: &[Multiaddr],
    ifaces: &[Multiaddr],
    nat: Option<&dyn NatManager>,
    observed: Option<&dyn ObservedAddrsManager>,
) -> Vec<Multiaddr> {
    // relay reservations show up as circuit listeners; the direct set is
    // the host's own addresses only
    let listeners: Vec<Multiaddr> = listeners
        .iter()
        .filter(|l| !is_circuit(l))
        .cloned()
        .collect();

    let mut out = Vec::new();
    for listen in &listeners {
        for bind in expand_unspecified(listen, ifaces) {
            push_unique(&mut out, bind);
        }
    }
    append_nat_and_observed(&mut out, &listeners, ifaces, nat, observed);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockNat<F: Fn(&Multiaddr) -> Option<Multiaddr> + Send + Sync>(F);

    impl<F: Fn(&Multiaddr) -> Option<Multiaddr> + Send + Sync> NatManager for MockNat<F> {
        fn mapping(&self, listen: &Multiaddr) -> Option<Multiaddr> {
            (self.0)(listen)
        }

        fn has_discovered_nat(&self) -> bool {
            true
        }
    }

    struct MockObserved<F: Fn(&Multiaddr) -> Vec<Multiaddr> + Send + Sync>(F);

    impl<F: Fn(&Multiaddr) -> Vec<Multiaddr> + Send + Sync> ObservedAddrsManager for MockObserved<F> {
        fn own_observed_addrs(&self) -> Vec<Multiaddr> {
            Vec::new()
        }

        fn observed_addrs_for(&self, local: &Multiaddr) -> Vec<Multiaddr> {
            (self.0)(local)
        }
    }

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    fn ifaces() -> Vec<Multiaddr> {
        vec![addr("/ip4/192.168.0.100"), addr("/ip4/1.1.1.1")]
    }

    fn sorted(mut addrs: Vec<Multiaddr>) -> Vec<Multiaddr> {
        addrs.sort_by_key(|a| a.to_vec());
        addrs
    }

    fn append(
        listen: &str,
        nat: impl Fn(&Multiaddr) -> Option<Multiaddr> + Send + Sync,
        observed: impl Fn(&Multiaddr) -> Vec<Multiaddr> + Send + Sync,
    ) -> Vec<Multiaddr> {
        let mut out = Vec::new();
        append_nat_and_observed(
            &mut out,
            &[addr(listen)],
            &ifaces(),
            Some(&MockNat(nat)),
            Some(&MockObserved(observed)),
        );
        dedup(out)
    }

    #[test]
    fn test_nat_map_success() {
        // mapping succeeds, observed address ignored
        let res = append(
            "/ip4/0.0.0.0/udp/1/quic-v1",
            |_| Some(addr("/ip4/1.1.1.1/udp/10/quic-v1")),
            |_| vec![addr("/ip4/2.2.2.2/udp/100/quic-v1")],
        );
        assert_eq!(res, vec![addr("/ip4/1.1.1.1/udp/10/quic-v1")]);
    }

    #[test]
    fn test_nat_map_failure() {
        // mapping fails, observed addresses added per interface bind
        let res = append(
            "/ip4/0.0.0.0/tcp/1",
            |_| None,
            |a| match extract_ip(a) {
                Some(ip) if ip == "192.168.0.100".parse::<std::net::IpAddr>().unwrap() => {
                    vec![addr("/ip4/2.2.2.2/tcp/100")]
                }
                Some(ip) if ip == "1.1.1.1".parse::<std::net::IpAddr>().unwrap() => {
                    vec![addr("/ip4/3.3.3.3/tcp/100")]
                }
                _ => vec![],
            },
        );
        assert_eq!(
            sorted(res),
            sorted(vec![addr("/ip4/2.2.2.2/tcp/100"), addr("/ip4/3.3.3.3/tcp/100")])
        );
    }

    #[test]
    fn test_iface_addrs_ignored_for_specified_listener() {
        let res = append(
            "/ip4/192.168.1.1/tcp/1",
            |_| None,
            |a| match extract_ip(a) {
                Some(ip) if ip == "192.168.1.1".parse::<std::net::IpAddr>().unwrap() => {
                    vec![addr("/ip4/4.4.4.4/tcp/100")]
                }
                Some(_) => vec![addr("/ip4/2.2.2.2/tcp/100")],
                None => vec![],
            },
        );
        assert_eq!(res, vec![addr("/ip4/4.4.4.4/tcp/100")]);
    }

    #[test]
    fn test_nat_map_success_but_cgnat() {
        // NAT address added together with the observed addresses
        let res = append(
            "/ip4/0.0.0.0/tcp/1",
            |_| Some(addr("/ip4/100.100.1.1/tcp/100")),
            |a| match extract_ip(a) {
                Some(ip) if ip == "192.168.0.100".parse::<std::net::IpAddr>().unwrap() => {
                    vec![addr("/ip4/2.2.2.2/tcp/20")]
                }
                _ => vec![addr("/ip4/3.3.3.3/tcp/30")],
            },
        );
        assert_eq!(
            sorted(res),
            sorted(vec![
                addr("/ip4/100.100.1.1/tcp/100"),
                addr("/ip4/2.2.2.2/tcp/20"),
                addr("/ip4/3.3.3.3/tcp/30"),
            ])
        );
    }

    #[test]
    fn test_uses_unspecified_address_for_observed_query() {
        // a UDP listener is queried with both the expanded binds and the
        // unspecified form
        let res = append(
            "/ip4/0.0.0.0/udp/2/quic-v1",
            |_| None,
            |a| {
                if is_ip_unspecified(a) {
                    vec![addr("/ip4/3.3.3.3/udp/20/quic-v1")]
                } else {
                    vec![addr("/ip4/2.2.2.2/udp/20/quic-v1")]
                }
            },
        );
        assert_eq!(
            sorted(res),
            sorted(vec![
                addr("/ip4/2.2.2.2/udp/20/quic-v1"),
                addr("/ip4/3.3.3.3/udp/20/quic-v1"),
            ])
        );
    }

    #[test]
    fn test_nat_port_only_takes_ip_from_observed() {
        // NAT reports an unspecified address with a port; the observed
        // address supplies the IP
        let res = append(
            "/ip4/127.0.0.1/udp/1/quic-v1",
            |_| Some(addr("/ip4/0.0.0.0/udp/2/quic-v1")),
            |a| {
                if a == &addr("/ip4/127.0.0.1/udp/1/quic-v1") {
                    vec![addr("/ip4/3.3.3.3/udp/1/quic-v1")]
                } else {
                    vec![]
                }
            },
        );
        assert_eq!(res, vec![addr("/ip4/3.3.3.3/udp/2/quic-v1")]);
    }

    #[test]
    fn test_observed_addrs_capped_per_listener() {
        let many: Vec<Multiaddr> = (1..=10)
            .map(|i| addr(&format!("/ip4/1.2.3.4/udp/{i}/quic-v1")))
            .collect();
        let many_clone = many.clone();
        let res = append(
            "/ip4/127.0.0.1/udp/1/quic-v1",
            |_| None,
            move |_| many_clone.clone(),
        );
        assert_eq!(res, many[..MAX_OBSERVED_ADDRS_PER_LISTEN_ADDR].to_vec());
    }

    #[test]
    fn test_direct_addrs_includes_expanded_listeners() {
        let listeners = [addr("/ip4/0.0.0.0/tcp/1")];
        let res = direct_addrs(&listeners, &ifaces(), None, None);
        assert_eq!(
            sorted(res),
            sorted(vec![
                addr("/ip4/192.168.0.100/tcp/1"),
                addr("/ip4/1.1.1.1/tcp/1"),
            ])
        );
    }

    #[test]
    fn test_direct_addrs_drops_observed_without_ip() {
        let listeners = [addr("/ip4/127.0.0.1/tcp/1")];
        let observed = MockObserved(|_: &Multiaddr| {
            vec![addr("/dns4/example.com/tcp/1"), addr("/ip4/2.2.2.2/tcp/1")]
        });
        let res = direct_addrs(&listeners, &[], None, Some(&observed));
        assert_eq!(
            res,
            vec![addr("/ip4/127.0.0.1/tcp/1"), addr("/ip4/2.2.2.2/tcp/1")]
        );
    }

    #[test]
    fn test_direct_addrs_excludes_circuit_listeners() {
        let circuit = addr(
            "/ip4/1.2.3.4/udp/1/quic-v1/p2p/QmdXGaeGiVA745XorV1jr11RHxB9z4fqykm6xCUPX1aTJo/p2p-circuit",
        );
        let listeners = [addr("/ip4/127.0.0.1/tcp/1"), circuit];
        let res = direct_addrs(&listeners, &[], None, None);
        assert_eq!(res, vec![addr("/ip4/127.0.0.1/tcp/1")]);
    }

    #[test]
    fn test_expand_unspecified_family_preserved() {
        let binds = expand_unspecified(
            &addr("/ip6/::/tcp/1"),
            &[addr("/ip4/192.168.0.100"), addr("/ip6/2001:db8::1")],
        );
        assert_eq!(binds, vec![addr("/ip6/2001:db8::1/tcp/1")]);
    }

    #[test]
    fn test_are_addrs_different() {
        let a = vec![addr("/ip4/1.1.1.1/tcp/1"), addr("/ip4/2.2.2.2/tcp/1")];
        let b = vec![addr("/ip4/2.2.2.2/tcp/1"), addr("/ip4/1.1.1.1/tcp/1")];
        assert!(!are_addrs_different(&a, &a));
        assert!(!are_addrs_different(&a, &b));

        let c = vec![addr("/ip4/1.1.1.1/tcp/1")];
        assert!(are_addrs_different(&a, &c));
        assert!(are_addrs_different(&c, &a));

        let d = vec![addr("/ip4/1.1.1.1/tcp/1"), addr("/ip4/3.3.3.3/tcp/1")];
        assert!(are_addrs_different(&a, &d));
        assert!(are_addrs_different(&d, &a));

        assert!(!are_addrs_different(&[], &[]));
    }

    #[test]
    fn test_remove_not_in_source() {
        let addrs: Vec<Multiaddr> = (0..10)
            .map(|i| addr(&format!("/ip4/1.2.3.4/tcp/{i}")))
            .collect();

        assert_eq!(remove_not_in_source(vec![], &addrs), vec![]);
        assert_eq!(remove_not_in_source(addrs[..5].to_vec(), &[]), vec![]);
        assert_eq!(
            remove_not_in_source(addrs.clone(), &addrs[..1]),
            addrs[..1].to_vec()
        );
        assert_eq!(
            remove_not_in_source(addrs.clone(), &addrs[5..]),
            addrs[5..].to_vec()
        );
        // order of the first argument is preserved
        assert_eq!(
            remove_not_in_source(
                addrs[..5].to_vec(),
                &[addrs[2].clone(), addrs[0].clone(), addrs[8].clone()]
            ),
            vec![addrs[0].clone(), addrs[2].clone()]
        );
    }

    #[test]
    fn test_dedup_preserves_first_seen_order() {
        let a = addr("/ip4/1.1.1.1/tcp/1");
        let b = addr("/ip4/2.2.2.2/tcp/1");
        assert_eq!(
            dedup(vec![a.clone(), b.clone(), a.clone(), b.clone()]),
            vec![a, b]
        );
    }
}
