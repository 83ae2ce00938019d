use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

/// Longest textual IP literal worth considering (IPv6 with a scope still
/// fits in 45 bytes); anything longer is discarded unparsed.
const MAX_IP_LITERAL_LEN: usize = 45;

/// Client-IP resolution that only believes forwarded headers from peers
/// inside a trusted CIDR set.
///
/// The forwarded header (`X-Forwarded-For` style: comma-separated,
/// left-most oldest) is attacker-controlled unless the immediate TCP peer is
/// a proxy we operate. An untrusted peer therefore always resolves to the
/// peer address itself, no matter what the header claims. For a trusted
/// peer, take the entry `trusted_hops` positions from the right of the
/// (syntactically valid) list, i.e. the address the nearest trusted proxy
/// saw.
#[derive(Debug, Clone)]
pub struct TrustedProxyResolver {
    trusted_hops: usize,
    trusted_cidrs: Vec<IpNetwork>,
}

impl Default for TrustedProxyResolver {
    /// One trusted hop, loopback-only trust: the safe posture for a
    /// process sitting directly behind a local reverse proxy.
    fn default() -> Self {
        Self {
            trusted_hops: 1,
            trusted_cidrs: vec![
                "127.0.0.0/8".parse().expect("loopback v4 cidr"),
                "::1/128".parse().expect("loopback v6 cidr"),
            ],
        }
    }
}

impl TrustedProxyResolver {
    pub fn new(trusted_hops: usize, trusted_cidrs: Vec<IpNetwork>) -> Self {
        Self {
            trusted_hops,
            trusted_cidrs,
        }
    }

    pub fn trusted_hops(&self) -> usize {
        self.trusted_hops
    }

    pub fn trusted_cidrs(&self) -> &[IpNetwork] {
        &self.trusted_cidrs
    }

    /// Resolve the effective client address from the forwarded header and
    /// the immediate remote address (with or without a port).
    ///
    /// Always returns either the peer address verbatim or one validated IP
    /// literal out of the header, never an unparseable string from the
    /// header.
    pub fn resolve(&self, forwarded_header: Option<&str>, remote_address: &str) -> String {
        let peer = match parse_peer(remote_address) {
            Some(ip) => ip,
            // An unparseable peer cannot be matched against the trust set,
            // so the header is ignored.
            None => return remote_address.to_string(),
        };

        if self.trusted_hops == 0 || !self.is_trusted_peer(peer) {
            return remote_address.to_string();
        }

        let entries: Vec<&str> = forwarded_header
            .map(|header| {
                header
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| is_ip_literal(entry))
                    .collect()
            })
            .unwrap_or_default();

        if entries.is_empty() {
            return remote_address.to_string();
        }

        // Count back `trusted_hops` positions from the right; a short list
        // clamps to its left-most entry.
        let index = entries.len().saturating_sub(self.trusted_hops);
        entries[index].to_string()
    }

    pub fn is_trusted_peer(&self, peer: IpAddr) -> bool {
        self.trusted_cidrs.iter().any(|cidr| cidr.contains(peer))
    }
}

/// Accept both a bare IP and an `ip:port` socket address.
fn parse_peer(remote_address: &str) -> Option<IpAddr> {
    remote_address
        .parse::<IpAddr>()
        .ok()
        .or_else(|| remote_address.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

fn is_ip_literal(entry: &str) -> bool {
    entry.len() <= MAX_IP_LITERAL_LEN && entry.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(cidr: &str, hops: usize) -> TrustedProxyResolver {
        TrustedProxyResolver::new(hops, vec![cidr.parse().unwrap()])
    }

    #[test]
    fn test_untrusted_peer_ignores_header() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(
            r.resolve(Some("127.0.0.1"), "203.0.113.50"),
            "203.0.113.50"
        );
    }

    #[test]
    fn test_trusted_peer_uses_header() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(r.resolve(Some("127.0.0.1"), "10.0.0.5"), "127.0.0.1");
    }

    #[test]
    fn test_hop_counting_from_the_right() {
        let r = resolver("10.0.0.0/8", 2);
        assert_eq!(
            r.resolve(Some("198.51.100.7, 192.0.2.1, 10.0.0.9"), "10.0.0.5"),
            "192.0.2.1"
        );
    }

    #[test]
    fn test_hops_beyond_list_clamp_to_leftmost() {
        let r = resolver("10.0.0.0/8", 5);
        assert_eq!(
            r.resolve(Some("198.51.100.7, 192.0.2.1"), "10.0.0.5"),
            "198.51.100.7"
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(
            r.resolve(
                Some("evil.example.com, <script>, 192.0.2.1, not-an-ip"),
                "10.0.0.5"
            ),
            "192.0.2.1"
        );
    }

    #[test]
    fn test_all_entries_malformed_falls_back_to_peer() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(r.resolve(Some("nope, also-nope"), "10.0.0.5"), "10.0.0.5");
        assert_eq!(r.resolve(Some(""), "10.0.0.5"), "10.0.0.5");
        assert_eq!(r.resolve(None, "10.0.0.5"), "10.0.0.5");
    }

    #[test]
    fn test_overlong_literal_rejected() {
        let r = resolver("10.0.0.0/8", 1);
        let oversized = format!("{}1", "0".repeat(MAX_IP_LITERAL_LEN));
        assert_eq!(r.resolve(Some(&oversized), "10.0.0.5"), "10.0.0.5");
    }

    #[test]
    fn test_peer_with_port_is_matched() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(r.resolve(Some("192.0.2.1"), "10.0.0.5:443"), "192.0.2.1");
    }

    #[test]
    fn test_zero_hops_never_trusts_header() {
        let r = resolver("10.0.0.0/8", 0);
        assert_eq!(r.resolve(Some("192.0.2.1"), "10.0.0.5"), "10.0.0.5");
    }

    #[test]
    fn test_default_trusts_loopback_only() {
        let r = TrustedProxyResolver::default();
        assert_eq!(r.resolve(Some("192.0.2.1"), "127.0.0.1"), "192.0.2.1");
        assert_eq!(r.resolve(Some("192.0.2.1"), "::1"), "192.0.2.1");
        assert_eq!(r.resolve(Some("192.0.2.1"), "203.0.113.50"), "203.0.113.50");
    }

    #[test]
    fn test_ipv6_entries_accepted() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(
            r.resolve(Some("2001:db8::1"), "10.0.0.5"),
            "2001:db8::1"
        );
    }

    #[test]
    fn test_unknown_peer_returned_verbatim() {
        let r = resolver("10.0.0.0/8", 1);
        assert_eq!(r.resolve(Some("192.0.2.1"), "unknown"), "unknown");
    }
}
