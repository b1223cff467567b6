//! Host name resolution with live reachability testing.
//!
//! A host name can resolve to addresses that are valid in DNS but not
//! usable from here (a stale AAAA record, an interface on another
//! subnet). When there is more than one candidate, each is tested with
//! a short TCP connect and the first that answers wins.
//!
//! Candidates are full socket addresses: an IPv6 link-local address is
//! meaningless without its scope id, so the port is the only part a
//! caller should replace.

use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use tracing::{debug, warn};

use super::socket::connect_tcp_socket;
use super::sys;
use crate::config::{AddressFamily, ReachabilityProbe};
use crate::error::LinkError;

/// How long each candidate gets to accept a test connection.
pub const TEST_PORT_TIMEOUT: Duration = Duration::from_secs(3);

/// An address literal, with an optional numeric IPv6 scope
/// (`fe80::1%2`). Literals skip the resolver entirely.
fn parse_literal(host: &str) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, 0));
    }
    format!("[{host}]:0")
        .parse::<SocketAddrV6>()
        .ok()
        .map(SocketAddr::V6)
}

/// Resolve `host` to the TCP-capable addresses allowed by `family`, in
/// resolver order. Every candidate has port 0.
pub fn lookup_candidates(host: &str, family: AddressFamily) -> Result<Vec<SocketAddr>, LinkError> {
    let resolved = match parse_literal(host) {
        Some(addr) => vec![addr],
        None => sys::lookup_host(host, family).map_err(|(code, source)| {
            warn!("name resolution for {host} failed: {code} ({source})");
            LinkError::Dns {
                host: host.to_string(),
                code,
                source,
            }
        })?,
    };

    let candidates: Vec<SocketAddr> = resolved
        .into_iter()
        .filter(|sa| family.accepts(&sa.ip()))
        .map(|mut sa| {
            sa.set_port(0);
            sa
        })
        .collect();

    if candidates.is_empty() {
        warn!("name resolution for {host} returned no usable addresses");
        return Err(LinkError::NoAddresses {
            host: host.to_string(),
        });
    }
    Ok(candidates)
}

/// Pick the first candidate that passes `test`.
///
/// Testing only happens when `probe` is set and either there is more
/// than one candidate or the probe asks to always test. Untested
/// candidates are accepted as-is. `test` sees the candidate with only
/// its port replaced.
pub fn select_reachable<F>(
    host: &str,
    candidates: &[SocketAddr],
    probe: Option<ReachabilityProbe>,
    mut test: F,
) -> Result<SocketAddr, LinkError>
where
    F: FnMut(SocketAddr) -> Result<(), LinkError>,
{
    let probe = probe.filter(|p| p.port != 0 && (candidates.len() > 1 || p.always_test));

    for &candidate in candidates {
        if let Some(p) = probe {
            let mut addr = candidate;
            addr.set_port(p.port);
            if let Err(e) = test(addr) {
                debug!("candidate {addr} for {host} is unreachable: {e}");
                continue;
            }
        }
        return Ok(candidate);
    }

    warn!("no working addresses found for host {host}");
    Err(LinkError::NoReachableAddress {
        host: host.to_string(),
    })
}

/// Resolve `host` and return the first usable address, with port 0.
pub fn resolve_host_name(
    host: &str,
    family: AddressFamily,
    probe: Option<ReachabilityProbe>,
) -> Result<SocketAddr, LinkError> {
    let candidates = lookup_candidates(host, family)?;
    select_reachable(host, &candidates, probe, |addr| {
        connect_tcp_socket(addr, TEST_PORT_TIMEOUT).map(drop)
    })
}
