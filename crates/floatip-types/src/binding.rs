//! Floating-IP bindings and the NAT rules observed for them.

use crate::ip::{parse_host, Ipv4Prefix};
use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A floating address forwarded to a managed address.
///
/// Bindings never carry a mask, so two bindings are equal exactly when
/// their address pairs are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Binding {
    pub floating_ip: Ipv4Addr,
    pub managed_ip: Ipv4Addr,
}

impl Binding {
    pub const fn new(floating_ip: Ipv4Addr, managed_ip: Ipv4Addr) -> Self {
        Self {
            floating_ip,
            managed_ip,
        }
    }

    /// Parses both sides, stripping any mask.
    pub fn parse(floating_ip: &str, managed_ip: &str) -> Result<Self, ParseError> {
        Ok(Self {
            floating_ip: parse_host(floating_ip)?,
            managed_ip: parse_host(managed_ip)?,
        })
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.floating_ip, self.managed_ip)
    }
}

/// A binding as requested by the desired-state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DesiredBinding {
    pub binding: Binding,
    /// Address to assign on the interface for `binding.floating_ip`.
    pub floating_prefix: Ipv4Prefix,
}

impl DesiredBinding {
    /// Builds a desired binding from raw store values.
    ///
    /// The floating address keeps its mask for interface assignment; a bare
    /// address gets `default_prefix_len`.
    pub fn parse(
        floating_ip: &str,
        managed_ip: &str,
        default_prefix_len: u8,
    ) -> Result<Self, ParseError> {
        let floating_prefix = Ipv4Prefix::parse_or_default(floating_ip, default_prefix_len)?;
        let binding = Binding::new(floating_prefix.address(), parse_host(managed_ip)?);
        Ok(Self {
            binding,
            floating_prefix,
        })
    }
}

/// NAT chain direction a live rule was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    /// DNAT in the pre-routing chain: floating -> managed.
    Forward,
    /// SNAT in the post-routing chain: managed -> floating.
    Reverse,
}

impl RuleKind {
    /// The iptables target this kind of rule jumps to.
    pub const fn target(&self) -> &'static str {
        match self {
            RuleKind::Forward => "DNAT",
            RuleKind::Reverse => "SNAT",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Forward => f.write_str("forward"),
            RuleKind::Reverse => f.write_str("reverse"),
        }
    }
}

/// A NAT rule parsed from a live chain listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveRule {
    pub kind: RuleKind,
    pub binding: Binding,
}
