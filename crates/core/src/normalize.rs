//! Target list normalization.
//!
//! User-supplied targets arrive as free-form strings (hostnames, URLs, IPs,
//! CIDRs, IP ranges). Scans must never be pointed at internal address space,
//! so private CIDRs, ranges and literals are filtered out here. Malformed
//! input is kept as-is; the external scanner rejects what it cannot parse.

use ipnet::IpNet;
use regex::Regex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

/// Matches `A.B.C.D-E` and `A.B.C.D-A.B.C.E` style IPv4 ranges.
static IP_RANGE_REGEX: OnceLock<Regex> = OnceLock::new();

fn ip_range_regex() -> &'static Regex {
    IP_RANGE_REGEX.get_or_init(|| {
        Regex::new(r"^(\d{1,3}(?:\.\d{1,3}){3})-(\d{1,3}(?:\.\d{1,3}){0,3})$")
            .expect("invalid IP range regex")
    })
}

/// Normalize and filter a raw target list.
///
/// Applied per input, in order: URL scheme stripping, trailing-slash trim,
/// empty drop, private CIDR drop, private range drop, private literal drop.
/// Duplicates are removed preserving the first occurrence. Never fails:
/// anything unrecognized is passed through untouched.
pub fn clean_targets<S: AsRef<str>>(targets: &[S]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut cleaned = Vec::new();

    for raw in targets {
        let target = strip_scheme(raw.as_ref());
        let target = target.trim_end_matches('/');

        if target.is_empty() {
            continue;
        }

        // CIDR notation (e.g. 10.0.0.0/24)
        if target.contains('/') {
            if let Ok(net) = target.parse::<IpNet>() {
                if is_private_net(&net) {
                    continue;
                }
            }
        }

        // IPv4 ranges (e.g. 172.16.1.1-10 or 172.16.1.1-172.16.1.10)
        if let Some(caps) = ip_range_regex().captures(target) {
            let start = &caps[1];
            let end_suffix = &caps[2];
            if range_has_private_endpoint(start, end_suffix) {
                continue;
            }
        }

        // Plain single IP literal
        if let Ok(addr) = target.parse::<IpAddr>() {
            if is_private_addr(&addr) {
                continue;
            }
        }

        if seen.insert(target.to_string()) {
            cleaned.push(target.to_string());
        }
    }

    cleaned
}

/// Strip a leading http:// or https:// scheme, keeping the authority
/// (or the path remainder when the authority is empty).
fn strip_scheme(target: &str) -> &str {
    let rest = if let Some(rest) = target.strip_prefix("http://") {
        rest
    } else if let Some(rest) = target.strip_prefix("https://") {
        rest
    } else {
        return target;
    };

    match rest.split('/').next() {
        Some(authority) if !authority.is_empty() => authority,
        _ => rest,
    }
}

/// Expand the range endpoints and check either for privacy.
/// A short suffix like "10" is expanded against the first three octets of
/// the start address. Unparseable endpoints are tolerated (range is kept).
fn range_has_private_endpoint(start: &str, end_suffix: &str) -> bool {
    let Ok(start_addr) = start.parse::<Ipv4Addr>() else {
        return false;
    };

    let end = if end_suffix.contains('.') {
        end_suffix.to_string()
    } else {
        let octets = start_addr.octets();
        format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], end_suffix)
    };

    let Ok(end_addr) = end.parse::<Ipv4Addr>() else {
        return false;
    };

    is_private_v4(&start_addr) || is_private_v4(&end_addr)
}

fn is_private_net(net: &IpNet) -> bool {
    match net {
        IpNet::V4(n) => is_private_v4(&n.network()),
        IpNet::V6(n) => is_private_v6(&n.network()),
    }
}

fn is_private_addr(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

/// RFC1918, loopback and link-local space is never scannable.
fn is_private_v4(addr: &Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.is_unspecified()
}

fn is_private_v6(addr: &Ipv6Addr) -> bool {
    // Unique-local fc00::/7 and link-local fe80::/10
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_private_and_normalizes() {
        let input = vec![
            "http://example.com/",
            "192.168.1.1",
            "10.0.0.0/24",
            "8.8.8.8",
            "172.16.1.1-172.16.1.10",
            "8.8.8.8-8.8.8.10",
            "",
        ];
        let cleaned = clean_targets(&input);
        assert_eq!(cleaned, vec!["example.com", "8.8.8.8", "8.8.8.8-8.8.8.10"]);
    }

    #[test]
    fn test_scheme_stripping_keeps_port() {
        let cleaned = clean_targets(&["https://example.com:8443/path/"]);
        assert_eq!(cleaned, vec!["example.com:8443"]);
    }

    #[test]
    fn test_short_suffix_range_expansion() {
        // 172.16.1.1-10 expands to 172.16.1.1-172.16.1.10, both private
        assert!(clean_targets(&["172.16.1.1-10"]).is_empty());
        assert_eq!(clean_targets(&["8.8.8.1-10"]), vec!["8.8.8.1-10"]);
    }

    #[test]
    fn test_loopback_and_link_local_dropped() {
        assert!(clean_targets(&["127.0.0.1"]).is_empty());
        assert!(clean_targets(&["169.254.10.1"]).is_empty());
        assert!(clean_targets(&["127.0.0.0/8"]).is_empty());
        assert!(clean_targets(&["::1"]).is_empty());
    }

    #[test]
    fn test_public_cidr_kept() {
        assert_eq!(clean_targets(&["8.8.8.0/24"]), vec!["8.8.8.0/24"]);
    }

    #[test]
    fn test_deduplicates_preserving_first_occurrence() {
        let cleaned = clean_targets(&["example.com", "http://example.com/", "other.org"]);
        assert_eq!(cleaned, vec!["example.com", "other.org"]);
    }

    #[test]
    fn test_malformed_input_kept() {
        let cleaned = clean_targets(&["not a hostname!", "300.400.500.600-700"]);
        assert_eq!(cleaned, vec!["not a hostname!", "300.400.500.600-700"]);
    }

    #[test]
    fn test_idempotent() {
        let input = vec![
            "http://example.com/",
            "8.8.8.8",
            "10.1.2.3",
            "somewhere.net/",
        ];
        let once = clean_targets(&input);
        let twice = clean_targets(&once);
        assert_eq!(once, twice);
    }
}
