//! Address formatting and classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Render an address for embedding in a URL-style string.
///
/// IPv4 is plain dotted text; IPv6 is enclosed in brackets.
pub fn url_safe_host(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

/// [`url_safe_host`] for a socket address, ignoring its port.
pub fn url_safe_string(addr: &SocketAddr) -> String {
    url_safe_host(&addr.ip())
}

/// Whether the first `prefix_len` bits of `addr` equal those of `subnet`.
///
/// Bits are compared most-significant first within each byte.
/// `prefix_len` is clamped to the shorter of the two slices.
pub fn in_subnet(addr: &[u8], subnet: &[u8], prefix_len: usize) -> bool {
    let prefix_len = prefix_len.min(addr.len() * 8).min(subnet.len() * 8);
    let full = prefix_len / 8;
    if addr[..full] != subnet[..full] {
        return false;
    }

    let rem = prefix_len % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem);
    addr[full] & mask == subnet[full] & mask
}

const V4_PRIVATE: [([u8; 4], usize); 4] = [
    ([10, 0, 0, 0], 8),
    ([172, 16, 0, 0], 12),
    ([192, 168, 0, 0], 16),
    // link-local
    ([169, 254, 0, 0], 16),
];

const V6_PRIVATE: [([u8; 2], usize); 3] = [
    // link-local fe80::/10
    ([0xfe, 0x80], 10),
    // deprecated site-local fec0::/10
    ([0xfe, 0xc0], 10),
    // unique-local fc00::/7
    ([0xfc, 0x00], 7),
];

/// Whether an IPv4 address belongs to a private or link-local range.
pub fn is_private_v4(addr: &Ipv4Addr) -> bool {
    let octets = addr.octets();
    V4_PRIVATE
        .iter()
        .any(|(net, len)| in_subnet(&octets, net, *len))
}

/// Whether an IPv6 address is link-local, site-local or unique-local.
pub fn is_private_v6(addr: &Ipv6Addr) -> bool {
    let octets = addr.octets();
    V6_PRIVATE
        .iter()
        .any(|(net, len)| in_subnet(&octets, net, *len))
}

/// Whether `addr` is on a private network.
pub fn is_private_network_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn url_safe_forms() {
        assert_eq!(url_safe_host(&ip("192.168.1.20")), "192.168.1.20");
        assert_eq!(url_safe_host(&ip("fe80::1")), "[fe80::1]");
        let sa: SocketAddr = "[2001:db8::5]:47989".parse().unwrap();
        assert_eq!(url_safe_string(&sa), "[2001:db8::5]");
    }

    #[test]
    fn private_v4() {
        for s in ["10.1.2.3", "172.16.0.1", "172.31.255.255", "192.168.1.1", "169.254.1.1"] {
            assert!(is_private_network_address(&ip(s)), "{s}");
        }
        for s in ["8.8.8.8", "172.32.0.1", "192.169.0.1", "11.0.0.1"] {
            assert!(!is_private_network_address(&ip(s)), "{s}");
        }
    }

    #[test]
    fn private_v6() {
        for s in ["fe80::1", "fc00::1", "fd12:3456::1", "fec0::1", "febf::1"] {
            assert!(is_private_network_address(&ip(s)), "{s}");
        }
        for s in ["2001:4860::1", "::1", "fe00::1", "ff02::1"] {
            assert!(!is_private_network_address(&ip(s)), "{s}");
        }
    }

    #[test]
    fn prefix_match_partial_byte() {
        assert!(in_subnet(&[0b1010_1111], &[0b1010_0000], 4));
        assert!(!in_subnet(&[0b1011_0000], &[0b1010_0000], 4));
        assert!(in_subnet(&[1, 2, 3], &[9, 9, 9], 0));
        assert!(in_subnet(&[1, 2, 3], &[1, 2], 64));
    }
}
