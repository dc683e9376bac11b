//! Test fixtures for common reconciliation scenarios
//!
//! Provides a pre-wired fake host and builders for store documents.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::{FakeIptables, FakeLink, MemorySource};

/// Interface the fake host managed by default.
pub const IFACE: &str = "eth0";

/// Address the fake interface carries before the daemon starts.
pub const PRIMARY: &str = "10.0.0.1/24";

/// Builds one store entry.
pub fn store_entry(floating_ip: &str, managed_ip: &str) -> Value {
    json!({ "floating_ip": floating_ip, "managed_ip": managed_ip })
}

/// Builds a store document from `(id, floating, managed)` triples.
pub fn store_document(entries: &[(&str, &str, &str)]) -> String {
    let object: Map<String, Value> = entries
        .iter()
        .map(|(id, floating, managed)| (id.to_string(), store_entry(floating, managed)))
        .collect();
    Value::Object(object).to_string()
}

/// A fake host: one interface carrying [`PRIMARY`], an empty nat table and
/// an empty desired state.
#[derive(Debug, Clone)]
pub struct TestHost {
    pub link: Arc<FakeLink>,
    pub iptables: Arc<FakeIptables>,
    pub source: Arc<MemorySource>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_link(FakeLink::new().with_interface(IFACE, &[PRIMARY]))
    }

    pub fn with_link(link: FakeLink) -> Self {
        Self {
            link: Arc::new(link),
            iptables: Arc::new(FakeIptables::new()),
            source: Arc::new(MemorySource::new()),
        }
    }

    /// Current addresses of [`IFACE`].
    pub fn addresses(&self) -> Vec<String> {
        self.link.addresses_of(IFACE)
    }

    /// Forgets recorded calls on both fakes, so the next tick's mutations
    /// can be counted on their own.
    pub fn reset_counters(&self) {
        self.link.clear_changes();
        self.iptables.clear_calls();
    }

    /// Address and rule changes since the last [`TestHost::reset_counters`].
    pub fn mutation_count(&self) -> usize {
        self.link.change_count() + self.iptables.mutation_count()
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floatip_common::DesiredState;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_store_document_parses() {
        let raw = store_document(&[
            ("a", "10.0.0.5", "10.0.0.10"),
            ("b", "10.0.0.6/28", "10.0.0.11"),
        ]);
        let state = DesiredState::parse_json(&raw, 24);
        assert_eq!(state.len(), 2);
        assert_eq!(state.skipped(), 0);
    }

    #[test]
    fn test_host_starts_with_primary() {
        let host = TestHost::new();
        assert_eq!(host.addresses(), vec![PRIMARY.to_string()]);
        assert_eq!(host.mutation_count(), 0);
    }
}
