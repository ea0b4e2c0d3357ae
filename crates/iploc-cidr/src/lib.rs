//! CIDR operations over IPv4-mapped range keys
//!
//! Range keys are stored as text in the IPv4-mapped form the datasets use
//! (`::ffff:a.b.c.d/N`). This crate provides:
//! - Parsing of those keys into a [`MappedCidr`] with IPv4 containment tests
//! - Query parsing that fails closed on anything that is not IPv4
//! - Bucket derivation (byte 12 of the 16-byte mapped address)
//! - The 3-octet and 2-octet textual prefixes used to scope cursor scans
//!
//! # Examples
//!
//! ```
//! use iploc_cidr::{MappedCidr, QueryPrefixes};
//! use std::net::Ipv4Addr;
//!
//! let cidr = MappedCidr::parse("::ffff:62.227.4.0/24").unwrap();
//! assert!(cidr.contains(Ipv4Addr::new(62, 227, 4, 198)));
//! assert!(!cidr.contains(Ipv4Addr::new(62, 227, 5, 1)));
//!
//! let prefixes = QueryPrefixes::of(Ipv4Addr::new(62, 227, 4, 198));
//! assert_eq!(prefixes.prefix3, "::ffff:62.227.4.");
//! assert_eq!(prefixes.prefix2, "::ffff:62.227.");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Textual prefix every mapped key starts with
pub const MAPPED_PREFIX: &str = "::ffff:";

/// CIDR errors
#[derive(Error, Debug)]
pub enum CidrError {
    /// Invalid CIDR notation
    #[error("Invalid CIDR notation: {0}")]
    InvalidNotation(String),

    /// Invalid IP address
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Invalid prefix length
    #[error("Invalid prefix length: {0} (must be 0-32 or 96-128)")]
    InvalidPrefixLength(u8),
}

pub type Result<T> = std::result::Result<T, CidrError>;

/// An IPv4 block written in IPv4-mapped notation
///
/// The prefix length may be given either as an IPv4 length (`/24`) or as the
/// IPv6 length over the mapped address (`/120`); both denote the same block.
/// The written form is kept so the key renders back exactly as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedCidr {
    /// Network address (base IP)
    network: u32,
    /// IPv4 prefix length (0-32)
    prefix_len: u8,
    /// Network mask
    mask: u32,
    /// Prefix length as written in the key
    written_len: u8,
}

impl MappedCidr {
    /// Parse a CIDR key
    ///
    /// Accepts `::ffff:a.b.c.d/N` and plain `a.b.c.d/N`.
    ///
    /// # Examples
    ///
    /// ```
    /// use iploc_cidr::MappedCidr;
    ///
    /// let short = MappedCidr::parse("::ffff:10.0.0.0/8").unwrap();
    /// let long = MappedCidr::parse("::ffff:10.0.0.0/104").unwrap();
    /// assert_eq!(short.prefix_len(), 8);
    /// assert_eq!(long.prefix_len(), 8);
    /// ```
    pub fn parse(cidr: &str) -> Result<Self> {
        let (ip_str, prefix_str) = cidr.split_once('/').ok_or_else(|| {
            CidrError::InvalidNotation("Expected format: ::ffff:x.x.x.x/prefix".to_string())
        })?;

        let written_len: u8 = prefix_str
            .parse()
            .map_err(|_| CidrError::InvalidNotation(format!("Invalid prefix: {}", prefix_str)))?;

        let prefix_len = match written_len {
            0..=32 => written_len,
            96..=128 => written_len - 96,
            other => return Err(CidrError::InvalidPrefixLength(other)),
        };

        let ip = parse_ipv4(strip_mapped(ip_str))?;
        let mask = mask_for(prefix_len);

        Ok(Self {
            network: u32::from(ip) & mask,
            prefix_len,
            mask,
            written_len,
        })
    }

    /// Create a CIDR from a network address and IPv4 prefix length
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefixLength(prefix_len));
        }

        let mask = mask_for(prefix_len);
        Ok(Self {
            network: u32::from(network) & mask,
            prefix_len,
            mask,
            written_len: prefix_len,
        })
    }

    /// Get network address
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Get IPv4 prefix length (0-32)
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Get broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !self.mask)
    }

    /// Get total number of IPs in this block
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix_len)
    }

    /// Check if an address is in this block
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & self.mask) == self.network
    }

    /// Bucket this block belongs to
    pub fn bucket(&self) -> u8 {
        bucket_of(self.network())
    }
}

impl fmt::Display for MappedCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", MAPPED_PREFIX, self.network(), self.written_len)
    }
}

fn mask_for(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !((1u64 << (32 - prefix_len)) - 1) as u32
    }
}

fn strip_mapped(ip: &str) -> &str {
    match ip.get(..MAPPED_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(MAPPED_PREFIX) => &ip[MAPPED_PREFIX.len()..],
        _ => ip,
    }
}

fn parse_ipv4(ip: &str) -> Result<Ipv4Addr> {
    ip.parse()
        .map_err(|_| CidrError::InvalidIpAddress(ip.to_string()))
}

/// Parse a query address
///
/// Dotted IPv4 and IPv4-mapped IPv6 are accepted; everything else, including
/// native IPv6, yields `None`.
pub fn parse_query(ip: &str) -> Option<Ipv4Addr> {
    match ip.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

/// 16-byte IPv4-mapped form of an address
pub fn to_mapped_bytes(ip: Ipv4Addr) -> [u8; 16] {
    ip.to_ipv6_mapped().octets()
}

/// Bucket of an address: byte 12 of the mapped form, i.e. the first octet
pub fn bucket_of(ip: Ipv4Addr) -> u8 {
    to_mapped_bytes(ip)[12]
}

/// Whether a dataset network field is written in IPv4-mapped form
pub fn is_mapped_network(network: &str) -> bool {
    let Some(rest) = network
        .get(..MAPPED_PREFIX.len())
        .filter(|head| head.eq_ignore_ascii_case(MAPPED_PREFIX))
        .map(|_| &network[MAPPED_PREFIX.len()..])
    else {
        return false;
    };
    rest.split('/')
        .next()
        .map_or(false, |addr| addr.contains('.'))
}

/// Rewrite a plain IPv4 network field into mapped form
///
/// Returns `None` when the field is not a dotted IPv4 network.
pub fn map_plain_network(network: &str) -> Option<String> {
    let addr = network.split('/').next()?;
    addr.parse::<Ipv4Addr>().ok()?;
    Some(format!("{}{}", MAPPED_PREFIX, network))
}

/// Textual prefixes scoping the cursor scans of one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPrefixes {
    /// `::ffff:a.b.c.`
    pub prefix3: String,
    /// `::ffff:a.b.`
    pub prefix2: String,
}

impl QueryPrefixes {
    /// Prefixes of a query address
    pub fn of(ip: Ipv4Addr) -> Self {
        let [a, b, c, _] = ip.octets();
        Self {
            prefix3: format!("{}{}.{}.{}.", MAPPED_PREFIX, a, b, c),
            prefix2: format!("{}{}.{}.", MAPPED_PREFIX, a, b),
        }
    }

    /// Prefixes of a stored key or mapped network field
    ///
    /// Cut after the third and second dot of the text. Returns `None` when the
    /// text has fewer than three dots.
    pub fn of_network(network: &str) -> Option<Self> {
        let mut dots = network.match_indices('.').map(|(idx, _)| idx);
        let second = dots.nth(1)?;
        let third = dots.next()?;
        Some(Self {
            prefix3: network[..=third].to_string(),
            prefix2: network[..=second].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapped_cidr() {
        let cidr = MappedCidr::parse("::ffff:192.168.1.0/24").unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(cidr.prefix_len(), 24);
    }

    #[test]
    fn test_parse_ipv6_prefix_length() {
        let cidr = MappedCidr::parse("::ffff:62.227.4.0/120").unwrap();
        assert_eq!(cidr.prefix_len(), 24);
        assert_eq!(cidr.to_string(), "::ffff:62.227.4.0/120");
        assert!(cidr.contains(Ipv4Addr::new(62, 227, 4, 198)));
    }

    #[test]
    fn test_parse_plain_cidr() {
        let cidr = MappedCidr::parse("10.0.0.0/8").unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.to_string(), "::ffff:10.0.0.0/8");
    }

    #[test]
    fn test_parse_invalid_cidr() {
        assert!(MappedCidr::parse("::ffff:192.168.1.0").is_err());
        assert!(MappedCidr::parse("::ffff:192.168.1.0/33").is_err());
        assert!(MappedCidr::parse("::ffff:192.168.1.0/95").is_err());
        assert!(MappedCidr::parse("::ffff:192.168.1.0/129").is_err());
        assert!(MappedCidr::parse("::ffff:256.0.0.0/24").is_err());
        assert!(MappedCidr::parse("2001:db8::/32").is_err());
    }

    #[test]
    fn test_cidr_masks_host_bits() {
        let cidr = MappedCidr::parse("::ffff:62.227.4.77/24").unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(62, 227, 4, 0));
        assert_eq!(cidr.to_string(), "::ffff:62.227.4.0/24");
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = MappedCidr::parse("::ffff:192.168.1.0/24").unwrap();
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 1, 0)));
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 1, 255)));
        assert!(!cidr.contains(Ipv4Addr::new(192, 168, 0, 1)));
        assert!(!cidr.contains(Ipv4Addr::new(192, 168, 2, 0)));
    }

    #[test]
    fn test_cidr_broadcast_and_size() {
        let cidr = MappedCidr::parse("::ffff:192.168.0.0/16").unwrap();
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(192, 168, 255, 255));
        assert_eq!(cidr.size(), 65536);

        let all = MappedCidr::new(Ipv4Addr::new(0, 0, 0, 0), 0).unwrap();
        assert_eq!(all.size(), 1u64 << 32);
        assert!(all.contains(Ipv4Addr::new(255, 255, 255, 255)));
    }

    #[test]
    fn test_cidr_slash_32() {
        let cidr = MappedCidr::parse("::ffff:192.168.1.1/128").unwrap();
        assert_eq!(cidr.size(), 1);
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!cidr.contains(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(parse_query("62.227.4.198"), Some(Ipv4Addr::new(62, 227, 4, 198)));
        assert_eq!(
            parse_query("::ffff:62.227.4.198"),
            Some(Ipv4Addr::new(62, 227, 4, 198))
        );
        assert_eq!(parse_query(" 1.2.3.4 "), Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(parse_query("not-an-ip"), None);
        assert_eq!(parse_query("2001:db8::1"), None);
        assert_eq!(parse_query(""), None);
    }

    #[test]
    fn test_bucket_is_first_octet() {
        let ip = Ipv4Addr::new(77, 22, 56, 119);
        let mapped = to_mapped_bytes(ip);
        assert_eq!(&mapped[..12], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
        assert_eq!(bucket_of(ip), 77);
        assert_eq!(MappedCidr::parse("::ffff:77.22.0.0/16").unwrap().bucket(), 77);
    }

    #[test]
    fn test_is_mapped_network() {
        assert!(is_mapped_network("::ffff:1.0.0.0"));
        assert!(is_mapped_network("::FFFF:1.0.0.0/120"));
        assert!(!is_mapped_network("1.0.0.0/24"));
        assert!(!is_mapped_network("2001:db8::/32"));
        assert!(!is_mapped_network("::ffff:"));
        assert!(!is_mapped_network(":"));
    }

    #[test]
    fn test_map_plain_network() {
        assert_eq!(
            map_plain_network("1.0.0.0/24").as_deref(),
            Some("::ffff:1.0.0.0/24")
        );
        assert_eq!(map_plain_network("2001:db8::/32"), None);
    }

    #[test]
    fn test_query_prefixes() {
        let p = QueryPrefixes::of(Ipv4Addr::new(77, 22, 56, 119));
        assert_eq!(p.prefix3, "::ffff:77.22.56.");
        assert_eq!(p.prefix2, "::ffff:77.22.");
    }

    #[test]
    fn test_network_prefixes_match_query_prefixes() {
        let key = MappedCidr::parse("::ffff:62.227.4.0/24").unwrap().to_string();
        let from_key = QueryPrefixes::of_network(&key).unwrap();
        let from_query = QueryPrefixes::of(Ipv4Addr::new(62, 227, 4, 198));
        assert_eq!(from_key, from_query);

        assert!(QueryPrefixes::of_network("::ffff:1.2").is_none());
    }
}
