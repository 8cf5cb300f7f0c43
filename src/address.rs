//! Classifies a target address string the way the SOCKS5 and SOCKS4
//! clients both need to: is this a dotted-quad IPv4 literal, a bracket-free
//! IPv6 literal, or a DNS name.

/// The three shapes a target address can take on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Ipv4,
    Ipv6,
    Domain,
}

/// A total function over non-empty strings: IPv4 exactly for strings
/// matching `^(\d{1,3}\.){3}\d{1,3}$` with each octet in `0..=255`, IPv6
/// exactly for strings made only of hex digits and colons containing at
/// least one colon, domain otherwise.
pub fn classify_address(addr: &str) -> AddressKind {
    if is_ipv4_literal(addr) {
        AddressKind::Ipv4
    } else if is_ipv6_literal(addr) {
        AddressKind::Ipv6
    } else {
        AddressKind::Domain
    }
}

fn is_ipv4_literal(addr: &str) -> bool {
    let parts: Vec<&str> = addr.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|p| {
            !p.is_empty()
                && p.len() <= 3
                && p.chars().all(|c| c.is_ascii_digit())
                && p.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

fn is_ipv6_literal(addr: &str) -> bool {
    addr.contains(':') && addr.chars().all(|c| c.is_ascii_hexdigit() || c == ':')
}

/// Parses an IPv6 literal already classified as [`AddressKind::Ipv6`] into
/// its 16-byte big-endian representation. `::` zero-compression is accepted
/// (delegated to `std::net::Ipv6Addr`); any literal that yields more than 8
/// groups, or otherwise fails to parse, is rejected.
pub fn parse_ipv6_octets(addr: &str) -> Option<[u8; 16]> {
    if addr.matches("::").count() == 0 && addr.split(':').count() > 8 {
        return None;
    }
    addr.parse::<std::net::Ipv6Addr>().ok().map(|a| a.octets())
}

/// Parses an IPv4 literal already classified as [`AddressKind::Ipv4`] into
/// its 4-byte representation.
pub fn parse_ipv4_octets(addr: &str) -> Option<[u8; 4]> {
    addr.parse::<std::net::Ipv4Addr>().ok().map(|a| a.octets())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ipv4() {
        assert_eq!(classify_address("1.2.3.4"), AddressKind::Ipv4);
        assert_eq!(classify_address("255.255.255.255"), AddressKind::Ipv4);
    }

    #[test]
    fn rejects_out_of_range_octets_as_domain() {
        assert_eq!(classify_address("256.1.1.1"), AddressKind::Domain);
        assert_eq!(classify_address("1.2.3.4.5"), AddressKind::Domain);
    }

    #[test]
    fn classifies_ipv6() {
        assert_eq!(classify_address("::1"), AddressKind::Ipv6);
        assert_eq!(classify_address("2001:db8::1"), AddressKind::Ipv6);
        assert_eq!(classify_address("fe80:0:0:0:0:0:0:1"), AddressKind::Ipv6);
    }

    #[test]
    fn classifies_domain() {
        assert_eq!(classify_address("example.com"), AddressKind::Domain);
        assert_eq!(classify_address("localhost"), AddressKind::Domain);
    }

    #[test]
    fn rejects_too_many_ipv6_groups() {
        assert!(parse_ipv6_octets("1:2:3:4:5:6:7:8:9").is_none());
        assert!(parse_ipv6_octets("1:2:3:4:5:6:7:8").is_some());
    }
}
