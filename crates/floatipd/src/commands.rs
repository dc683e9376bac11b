//! iptables argument builders for floating-IP rules
//!
//! Every builder returns the argument vector handed to
//! [`NatTable::raw`](floatip_common::NatTable::raw); the `-w` lock flag is
//! added by the shell-backed table itself.

use floatip_types::{Binding, RuleKind};

use crate::tables::{FORWARD_CHAIN, NAT_TABLE, REVERSE_CHAIN};

/// Rule-level iptables action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// `-C`: exits non-zero when the rule is absent
    Check,
    /// `-A`: append at the end of the chain
    Append,
    /// `-I`: insert at the head of the chain
    Insert,
    /// `-D`: delete the first matching rule
    Delete,
}

impl RuleOp {
    pub const fn flag(&self) -> &'static str {
        match self {
            RuleOp::Check => "-C",
            RuleOp::Append => "-A",
            RuleOp::Insert => "-I",
            RuleOp::Delete => "-D",
        }
    }
}

fn nat_args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = vec!["-t".to_string(), NAT_TABLE.to_string()];
    args.extend(parts.into_iter().map(Into::into));
    args
}

/// Build numeric chain listing arguments
///
/// Also used as the existence probe for owned chains
pub fn build_list_chain_args(chain: &str) -> Vec<String> {
    nat_args(["-n", "-L", chain])
}

/// Build chain creation arguments
pub fn build_new_chain_args(chain: &str) -> Vec<String> {
    nat_args(["-N", chain])
}

/// Build chain flush arguments
pub fn build_flush_chain_args(chain: &str) -> Vec<String> {
    nat_args(["-F", chain])
}

/// Build a jump rule from a built-in chain to an owned chain
///
/// Only traffic addressed to a local address takes the jump
pub fn build_jump_rule_args(op: RuleOp, builtin: &str, target: &str) -> Vec<String> {
    nat_args([
        op.flag(),
        builtin,
        "-m",
        "addrtype",
        "--dst-type",
        "LOCAL",
        "-j",
        target,
    ])
}

/// Rule specification (match and target) for one direction of a binding
pub fn rule_spec(kind: RuleKind, binding: &Binding) -> Vec<String> {
    let floating = binding.floating_ip.to_string();
    let managed = binding.managed_ip.to_string();
    match kind {
        RuleKind::Forward => vec![
            "-d".to_string(),
            floating,
            "-j".to_string(),
            kind.target().to_string(),
            "--to-destination".to_string(),
            managed,
        ],
        RuleKind::Reverse => vec![
            "-s".to_string(),
            managed,
            "-j".to_string(),
            kind.target().to_string(),
            "--to-source".to_string(),
            floating,
        ],
    }
}

/// Chain a rule of the given direction lives in
pub const fn chain_for(kind: RuleKind) -> &'static str {
    match kind {
        RuleKind::Forward => FORWARD_CHAIN,
        RuleKind::Reverse => REVERSE_CHAIN,
    }
}

/// Build a rule-level command for one direction of a binding
pub fn build_rule_args(op: RuleOp, kind: RuleKind, binding: &Binding) -> Vec<String> {
    let mut args = nat_args([op.flag(), chain_for(kind)]);
    args.extend(rule_spec(kind, binding));
    args
}
