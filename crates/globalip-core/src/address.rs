//! Address literals and address families
//!
//! Global IPs and route targets travel as literal strings. [`Address`]
//! validates them once and keeps the literal as received so that it can be
//! persisted byte-for-byte, while comparisons use the parsed value.
//!
//! Accepted forms:
//! - IPv4: four dot-separated decimal octets, 0-255
//! - IPv6: eight colon-separated groups of 1-4 hex digits (full form only)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IP address family of a global IP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl AddressFamily {
    /// Family of a parsed address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("ipv4"),
            AddressFamily::V6 => f.write_str("ipv6"),
        }
    }
}

/// A validated IPv4 or IPv6 literal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    literal: String,
    ip: IpAddr,
}

impl Address {
    /// Validate a literal
    pub fn parse(literal: &str) -> Result<Self> {
        let ip = if literal.contains(':') {
            parse_v6_full(literal).map(IpAddr::V6)
        } else {
            parse_v4(literal).map(IpAddr::V4)
        }
        .ok_or_else(|| Error::InvalidAddress(literal.to_string()))?;

        Ok(Self {
            literal: literal.to_string(),
            ip,
        })
    }

    /// The literal exactly as it was received
    pub fn as_str(&self) -> &str {
        &self.literal
    }

    /// The parsed address
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The address family
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }
}

fn parse_v4(literal: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = literal.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse::<u8>().ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

fn parse_v6_full(literal: &str) -> Option<Ipv6Addr> {
    let mut groups = [0u16; 8];
    let mut parts = literal.split(':');

    for group in groups.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 4 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *group = u16::from_str_radix(part, 16).ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(Ipv6Addr::from(groups))
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.literal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dotted_quad() {
        let addr = Address::parse("10.0.0.5").unwrap();
        assert_eq!(addr.family(), AddressFamily::V4);
        assert_eq!(addr.as_str(), "10.0.0.5");

        assert!(Address::parse("255.255.255.255").is_ok());
        assert!(Address::parse("0.0.0.0").is_ok());
        // Leading zeros are decimal, not octal
        assert_eq!(
            Address::parse("010.000.000.001").unwrap().ip(),
            IpAddr::from([10, 0, 0, 1])
        );
    }

    #[test]
    fn rejects_malformed_v4() {
        for bad in ["", "10.0.0", "10.0.0.5.1", "256.0.0.1", "10.0.0.x", "10..0.1", "1000.0.0.1"] {
            assert!(Address::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn accepts_full_form_v6() {
        let addr = Address::parse("2607:f0d0:1000:00c8:0000:0000:0000:0004").unwrap();
        assert_eq!(addr.family(), AddressFamily::V6);
        assert!(Address::parse("2607:f0d0:1000:c8:0:0:0:4").is_ok());
    }

    #[test]
    fn rejects_compressed_or_malformed_v6() {
        for bad in [
            "2607:f0d0::4",
            "2607:f0d0:1000:00c8:0000:0000:0004",
            "2607:f0d0:1000:00c8:0000:0000:0000:0004:0001",
            "2607:f0d0:1000:00c8:0000:0000:0000:g004",
            "2607:f0d0:1000:00c8:00000:0000:0000:0004",
            "::ffff:10.0.0.1",
        ] {
            assert!(Address::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn equality_is_semantic_but_literal_is_kept() {
        let padded = Address::parse("2607:f0d0:1000:00c8:0000:0000:0000:0004").unwrap();
        let short = Address::parse("2607:f0d0:1000:c8:0:0:0:4").unwrap();
        assert_eq!(padded, short);
        assert_ne!(padded.as_str(), short.as_str());
    }

    #[test]
    fn serializes_as_literal() {
        let addr = Address::parse("10.0.0.9").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.9\"");

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "10.0.0.9");
        assert!(serde_json::from_str::<Address>("\"10.0.0\"").is_err());
    }
}
