//! IPv4 address and prefix helpers with mask normalization.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Returns the address part of `raw`, dropping any `/mask` suffix.
///
/// ```
/// use floatip_types::strip_mask;
///
/// assert_eq!(strip_mask("203.0.113.5/24"), "203.0.113.5");
/// assert_eq!(strip_mask("203.0.113.5"), "203.0.113.5");
/// ```
pub fn strip_mask(raw: &str) -> &str {
    raw.split('/').next().unwrap_or(raw).trim()
}

/// Parses an IPv4 host address, ignoring any mask.
pub fn parse_host(raw: &str) -> Result<Ipv4Addr, ParseError> {
    strip_mask(raw)
        .parse::<Ipv4Addr>()
        .map_err(|_| ParseError::InvalidIpAddress(raw.to_string()))
}

/// An IPv4 address with a prefix length, e.g. `10.0.0.5/24`.
///
/// Unlike a network prefix, the host bits are preserved: this is the form
/// `ip addr` uses for interface addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ipv4Prefix {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Prefix {
    /// Creates a new prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix_len` is greater than 32.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 32 {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum 32",
                prefix_len
            )));
        }

        Ok(Ipv4Prefix {
            address,
            prefix_len,
        })
    }

    /// Parses `raw` as `a.b.c.d/len`, or as a bare address using
    /// `default_len` as the mask.
    pub fn parse_or_default(raw: &str, default_len: u8) -> Result<Self, ParseError> {
        if raw.contains('/') {
            raw.parse()
        } else {
            Ipv4Prefix::new(parse_host(raw)?, default_len)
        }
    }

    pub const fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns true if both prefixes carry the same address, whatever the mask.
    pub fn same_host(&self, other: &Ipv4Prefix) -> bool {
        self.address == other.address
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .trim()
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: Ipv4Addr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        Ipv4Prefix::new(address, prefix_len)
    }
}
