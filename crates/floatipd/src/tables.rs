//! iptables table and chain name constants for floatipd

/// Table every floatipd rule lives in
pub const NAT_TABLE: &str = "nat";

// Chains owned by floatipd
/// Pre-routing chain holding the forward (DNAT) rules
pub const FORWARD_CHAIN: &str = "FLOAT_IP_PREROUTING";

/// Post-routing chain holding the reverse (SNAT) rules
pub const REVERSE_CHAIN: &str = "FLOAT_IP_POSTROUTING";

// Built-in chains the owned chains are wired into
pub const PREROUTING_CHAIN: &str = "PREROUTING";
pub const POSTROUTING_CHAIN: &str = "POSTROUTING";
pub const OUTPUT_CHAIN: &str = "OUTPUT";

/// `(builtin, owned)` chain pairs wired with a jump rule.
///
/// `OUTPUT` jumps to the pre-routing chain so locally originated traffic to a
/// floating address is forwarded too.
pub const JUMP_RULES: [(&str, &str); 3] = [
    (PREROUTING_CHAIN, FORWARD_CHAIN),
    (POSTROUTING_CHAIN, REVERSE_CHAIN),
    (OUTPUT_CHAIN, FORWARD_CHAIN),
];

/// Chains flushed on shutdown
pub const OWNED_CHAINS: [&str; 2] = [FORWARD_CHAIN, REVERSE_CHAIN];
