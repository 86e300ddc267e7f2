//! Address Guard — classifies a hostname or IP literal as SSRF-blocked.
//!
//! Used twice per outbound request: once against the raw `url` host (to
//! catch hard-coded private IP literals before any DNS lookup happens),
//! and once against every address a DNS lookup returns (to catch names
//! that resolve to private space, including rebinding attempts where a
//! single name answers with both public and private records).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("BlockedAddress: {0}")]
pub struct BlockedAddress(pub String);

/// True if `addr` falls in loopback, private, link-local, multicast/reserved,
/// or unspecified space, per spec §4.1.
pub fn is_blocked(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    let loopback = octets[0] == 127;
    let private = octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168);
    let link_local = octets[0] == 169 && octets[1] == 254;
    let multicast_or_reserved = octets[0] >= 224; // 224.0.0.0/4 multicast, 240.0.0.0/4 reserved, broadcast
    let unspecified = addr.is_unspecified();

    loopback || private || link_local || multicast_or_reserved || unspecified
}

fn is_blocked_v6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    let link_local = (segments[0] & 0xffc0) == 0xfe80; // fe80::/10
    let unique_local = (segments[0] & 0xfe00) == 0xfc00; // fc00::/7

    // An IPv4-mapped IPv6 address (::ffff:a.b.c.d) inherits the IPv4 guard.
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }

    link_local || unique_local
}

/// Classify a hostname that is *known* to be (or parse as) an IP literal.
/// Returns `Ok(())` if it is not an IP literal at all — DNS names are
/// classified later, once resolved, by [`is_blocked`].
pub fn guard_or_fail(host: &str) -> Result<(), BlockedAddress> {
    // Strip brackets from a bracketed IPv6 literal, e.g. "[::1]".
    let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);

    if let Ok(addr) = bare.parse::<IpAddr>() {
        if is_blocked(addr) {
            return Err(BlockedAddress(host.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn blocks_ipv4_loopback() {
        assert!(is_blocked(ip("127.0.0.1")));
    }

    #[test]
    fn blocks_ipv4_private_ranges() {
        assert!(is_blocked(ip("10.0.0.1")));
        assert!(is_blocked(ip("172.16.0.1")));
        assert!(is_blocked(ip("172.31.255.255")));
        assert!(is_blocked(ip("192.168.1.1")));
    }

    #[test]
    fn allows_ipv4_adjacent_to_private_ranges() {
        assert!(!is_blocked(ip("172.15.255.255")));
        assert!(!is_blocked(ip("172.32.0.0")));
        assert!(!is_blocked(ip("11.0.0.1")));
    }

    #[test]
    fn blocks_ipv4_link_local_and_metadata_endpoint() {
        assert!(is_blocked(ip("169.254.169.254")));
        assert!(is_blocked(ip("169.254.1.1")));
    }

    #[test]
    fn blocks_ipv4_multicast_and_reserved_and_unspecified() {
        assert!(is_blocked(ip("224.0.0.1")));
        assert!(is_blocked(ip("240.0.0.1")));
        assert!(is_blocked(ip("255.255.255.255")));
        assert!(is_blocked(ip("0.0.0.0")));
    }

    #[test]
    fn allows_public_ipv4() {
        assert!(!is_blocked(ip("8.8.8.8")));
        assert!(!is_blocked(ip("1.1.1.1")));
    }

    #[test]
    fn blocks_ipv6_loopback_link_local_unique_local_unspecified() {
        assert!(is_blocked(ip("::1")));
        assert!(is_blocked(ip("fe80::1")));
        assert!(is_blocked(ip("fc00::1")));
        assert!(is_blocked(ip("fd12:3456:789a::1")));
        assert!(is_blocked(ip("::")));
    }

    #[test]
    fn allows_public_ipv6() {
        assert!(!is_blocked(ip("2606:4700:4700::1111")));
    }

    #[test]
    fn blocks_ipv4_mapped_private_ipv6() {
        assert!(is_blocked(ip("::ffff:10.0.0.1")));
    }

    #[test]
    fn guard_or_fail_passes_dns_names_through() {
        assert!(guard_or_fail("example.com").is_ok());
    }

    #[test]
    fn guard_or_fail_blocks_ip_literal() {
        let err = guard_or_fail("127.0.0.1").unwrap_err();
        assert_eq!(err, BlockedAddress("127.0.0.1".to_string()));
    }

    #[test]
    fn guard_or_fail_blocks_bracketed_ipv6_literal() {
        assert!(guard_or_fail("[::1]").is_err());
    }

    #[test]
    fn guard_or_fail_allows_public_ip_literal() {
        assert!(guard_or_fail("8.8.8.8").is_ok());
    }
}
