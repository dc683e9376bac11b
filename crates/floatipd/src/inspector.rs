//! Rule Inspector - parses `iptables -n -L` listings into live rules
//!
//! A numeric listing row has the columns
//! `target prot opt source destination [options]`, e.g.
//!
//! ```text
//! DNAT       all  --  0.0.0.0/0            10.0.0.5             to:10.0.0.10
//! SNAT       all  --  10.0.0.10            0.0.0.0/0            to:10.0.0.5
//! ```
//!
//! For DNAT the floating address is the destination and the managed address
//! follows `to:`; for SNAT the managed address is the source and the
//! floating address follows `to:`.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use floatip_types::{parse_host, Binding, LiveRule, RuleKind};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Matches rows whose target is DNAT or SNAT.
static NAT_ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(DNAT|SNAT)\s").expect("Invalid regex pattern"));

const SOURCE_FIELD: usize = 3;
const DESTINATION_FIELD: usize = 4;
const OPTIONS_FIELD: usize = 5;

/// Address inside a `to:ip[:port]` option.
fn parse_to_option(raw: &str) -> Option<Ipv4Addr> {
    let mut parts = raw.split(':');
    if parts.next()? != "to" {
        return None;
    }
    parse_host(parts.next()?).ok()
}

fn parse_row(kind: RuleKind, fields: &[&str]) -> Option<Binding> {
    let to = parse_to_option(fields.get(OPTIONS_FIELD)?)?;
    match kind {
        RuleKind::Forward => {
            let floating = parse_host(fields.get(DESTINATION_FIELD)?).ok()?;
            Some(Binding::new(floating, to))
        }
        RuleKind::Reverse => {
            let managed = parse_host(fields.get(SOURCE_FIELD)?).ok()?;
            Some(Binding::new(to, managed))
        }
    }
}

/// Extracts every `kind` rule from a chain listing.
///
/// Header lines, rows of the other NAT target and malformed rows are
/// skipped. Duplicated rules collapse into one entry.
pub fn parse_listing(kind: RuleKind, listing: &str) -> BTreeSet<LiveRule> {
    listing
        .lines()
        .filter(|line| {
            NAT_ROW_RE
                .captures(line)
                .and_then(|c| c.get(1))
                .is_some_and(|m| m.as_str() == kind.target())
        })
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let parsed = parse_row(kind, &fields);
            if parsed.is_none() {
                debug!(%kind, line, "Skipping unparsable rule line");
            }
            parsed
        })
        .map(|binding| LiveRule { kind, binding })
        .collect()
}

/// Bindings of the forward rules in a pre-routing chain listing.
pub fn forward_bindings(listing: &str) -> BTreeSet<Binding> {
    parse_listing(RuleKind::Forward, listing)
        .into_iter()
        .map(|r| r.binding)
        .collect()
}

/// Bindings of the reverse rules in a post-routing chain listing.
pub fn reverse_bindings(listing: &str) -> BTreeSet<Binding> {
    parse_listing(RuleKind::Reverse, listing)
        .into_iter()
        .map(|r| r.binding)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PRE_LISTING: &str = "\
Chain FLOAT_IP_PREROUTING (2 references)
target     prot opt source               destination
DNAT       all  --  0.0.0.0/0            10.0.0.5             to:10.0.0.10
DNAT       all  --  0.0.0.0/0            10.0.0.6/32          to:10.0.0.11:8080
SNAT       all  --  10.0.0.10            0.0.0.0/0            to:10.0.0.5
";

    const POST_LISTING: &str = "\
Chain FLOAT_IP_POSTROUTING (1 references)
target     prot opt source               destination
SNAT       all  --  10.0.0.10            0.0.0.0/0            to:10.0.0.5
SNAT       all  --  10.0.0.11/32         0.0.0.0/0            to:10.0.0.6
";

    fn b(f: &str, m: &str) -> Binding {
        Binding::parse(f, m).unwrap()
    }

    #[test]
    fn test_forward_rows() {
        let bindings = forward_bindings(PRE_LISTING);
        assert_eq!(
            bindings,
            [b("10.0.0.5", "10.0.0.10"), b("10.0.0.6", "10.0.0.11")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_reverse_rows() {
        let bindings = reverse_bindings(POST_LISTING);
        assert_eq!(
            bindings,
            [b("10.0.0.5", "10.0.0.10"), b("10.0.0.6", "10.0.0.11")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_empty_chain() {
        let listing = "Chain FLOAT_IP_PREROUTING (2 references)\n\
                       target     prot opt source               destination\n";
        assert!(forward_bindings(listing).is_empty());
        assert!(forward_bindings("").is_empty());
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let listing = "\
DNAT       all  --  0.0.0.0/0            10.0.0.5
DNAT       all  --  0.0.0.0/0            not-an-ip            to:10.0.0.10
DNAT       all  --  0.0.0.0/0            10.0.0.7             to:bogus
DNATX      all  --  0.0.0.0/0            10.0.0.8             to:10.0.0.10
 DNAT      all  --  0.0.0.0/0            10.0.0.9             to:10.0.0.10
DNAT       all  --  0.0.0.0/0            10.0.0.5             to:10.0.0.10
";
        assert_eq!(
            forward_bindings(listing),
            [b("10.0.0.5", "10.0.0.10")].into_iter().collect()
        );
    }

    #[test]
    fn test_duplicates_collapse() {
        let listing = "\
DNAT       all  --  0.0.0.0/0            10.0.0.5             to:10.0.0.10
DNAT       all  --  0.0.0.0/0            10.0.0.5/32          to:10.0.0.10
";
        assert_eq!(parse_listing(RuleKind::Forward, listing).len(), 1);
    }
}
