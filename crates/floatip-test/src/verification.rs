//! Verification helpers for testing reconciliation
//!
//! Provides assertion helpers over the fake host's nat table and interface

use std::collections::BTreeSet;

use thiserror::Error;

use crate::fixtures::{TestHost, IFACE};

/// Pre-routing chain floatipd owns.
pub const FORWARD_CHAIN: &str = "FLOAT_IP_PREROUTING";

/// Post-routing chain floatipd owns.
pub const REVERSE_CHAIN: &str = "FLOAT_IP_POSTROUTING";

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("{what} mismatch: expected {expected:?}, got {actual:?}")]
    SetMismatch {
        what: &'static str,
        expected: BTreeSet<String>,
        actual: BTreeSet<String>,
    },

    #[error("Expected address '{address}' on {iface}")]
    AddressMissing { iface: String, address: String },

    #[error("Unexpected address '{address}' on {iface}")]
    AddressPresent { iface: String, address: String },

    #[error("Chain '{chain}' holds duplicate rules: {rules:?}")]
    DuplicateRules { chain: String, rules: Vec<String> },

    #[error("Expected {expected} host mutations, found {actual}")]
    MutationCount { expected: usize, actual: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

fn pair_set(pairs: &[(&str, &str)]) -> BTreeSet<String> {
    pairs.iter().map(|(f, m)| format!("{f} -> {m}")).collect()
}

/// Host state verification helper
pub struct HostVerifier<'a> {
    host: &'a TestHost,
}

impl<'a> HostVerifier<'a> {
    pub fn new(host: &'a TestHost) -> Self {
        Self { host }
    }

    /// `floating -> managed` pairs currently installed as forward rules.
    pub fn forward_pairs(&self) -> BTreeSet<String> {
        self.host
            .iptables
            .nat_pairs(FORWARD_CHAIN, "DNAT", "-d", "--to-destination")
            .into_iter()
            .map(|(floating, managed)| format!("{floating} -> {managed}"))
            .collect()
    }

    /// `floating -> managed` pairs currently installed as reverse rules.
    pub fn reverse_pairs(&self) -> BTreeSet<String> {
        self.host
            .iptables
            .nat_pairs(REVERSE_CHAIN, "SNAT", "-s", "--to-source")
            .into_iter()
            .map(|(managed, floating)| format!("{floating} -> {managed}"))
            .collect()
    }

    /// Verify the forward chain holds exactly `pairs` as `(floating, managed)`.
    pub fn assert_forward_rules(&self, pairs: &[(&str, &str)]) -> VerifyResult<()> {
        let expected = pair_set(pairs);
        let actual = self.forward_pairs();
        if expected != actual {
            return Err(VerificationError::SetMismatch {
                what: "forward rules",
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the reverse chain holds exactly `pairs` as `(floating, managed)`.
    pub fn assert_reverse_rules(&self, pairs: &[(&str, &str)]) -> VerifyResult<()> {
        let expected = pair_set(pairs);
        let actual = self.reverse_pairs();
        if expected != actual {
            return Err(VerificationError::SetMismatch {
                what: "reverse rules",
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify both chains hold exactly `pairs`, with no duplicates.
    pub fn assert_bindings(&self, pairs: &[(&str, &str)]) -> VerifyResult<()> {
        self.assert_no_duplicates(FORWARD_CHAIN)?;
        self.assert_no_duplicates(REVERSE_CHAIN)?;
        self.assert_forward_rules(pairs)?;
        self.assert_reverse_rules(pairs)
    }

    pub fn assert_no_duplicates(&self, chain: &str) -> VerifyResult<()> {
        let rules: Vec<String> = self
            .host
            .iptables
            .rules(chain)
            .iter()
            .map(|spec| spec.join(" "))
            .collect();
        let unique: BTreeSet<&String> = rules.iter().collect();
        if unique.len() != rules.len() {
            return Err(VerificationError::DuplicateRules {
                chain: chain.to_string(),
                rules,
            });
        }
        Ok(())
    }

    /// Verify the interface carries exactly `addresses`, in any order.
    pub fn assert_addresses(&self, addresses: &[&str]) -> VerifyResult<()> {
        let expected: BTreeSet<String> = addresses.iter().map(|a| a.to_string()).collect();
        let actual: BTreeSet<String> = self.host.addresses().into_iter().collect();
        if expected != actual {
            return Err(VerificationError::SetMismatch {
                what: "interface addresses",
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn assert_address_present(&self, address: &str) -> VerifyResult<()> {
        if !self.host.addresses().iter().any(|a| a == address) {
            return Err(VerificationError::AddressMissing {
                iface: IFACE.to_string(),
                address: address.to_string(),
            });
        }
        Ok(())
    }

    pub fn assert_address_absent(&self, address: &str) -> VerifyResult<()> {
        if self.host.addresses().iter().any(|a| a == address) {
            return Err(VerificationError::AddressPresent {
                iface: IFACE.to_string(),
                address: address.to_string(),
            });
        }
        Ok(())
    }

    /// Verify the host saw exactly `expected` address and rule mutations
    /// since the last counter reset.
    pub fn assert_mutations(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.host.mutation_count();
        if actual != expected {
            return Err(VerificationError::MutationCount { expected, actual });
        }
        Ok(())
    }
}
