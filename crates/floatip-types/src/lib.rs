//! Common types for floating-IP NAT reconciliation.
//!
//! This crate provides type-safe representations of the values exchanged
//! between the desired-state store, the rule inspector and the reconciler:
//!
//! - [`Ipv4Prefix`]: an IPv4 address with its mask, as assigned on an interface
//! - [`Binding`]: a mask-free `(floating_ip, managed_ip)` pair
//! - [`DesiredBinding`]: a binding plus the floating prefix to assign
//! - [`LiveRule`] / [`RuleKind`]: an observed DNAT or SNAT rule

mod binding;
mod ip;

pub use binding::{Binding, DesiredBinding, LiveRule, RuleKind};
pub use ip::{parse_host, strip_mask, Ipv4Prefix};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IPv4 address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IPv4 prefix format: {0}")]
    InvalidIpPrefix(String),
}
