//! Desired-state source.
//!
//! The store is a JSON object keyed by binding id:
//!
//! ```json
//! {
//!   "web-1": { "floating_ip": "203.0.113.5/24", "managed_ip": "10.42.0.7", "host": "h1" },
//!   "db-1":  { "floating_ip": "203.0.113.6", "managed_ip": "10.42.0.9" }
//! }
//! ```
//!
//! Extra fields are ignored. Reading never fails: a missing or malformed
//! file is an empty desired state, and malformed entries are counted in
//! [`DesiredState::skipped`].

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use floatip_types::{Binding, DesiredBinding};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Default desired-state file written by the metadata poller.
pub const DEFAULT_STORE_PATH: &str = "/var/run/docker/emc_fip_db.json";

/// Mask assigned to a floating address that has none in the store.
pub const DEFAULT_PREFIX_LEN: u8 = 24;

/// One raw entry of the store.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingRecord {
    pub floating_ip: String,
    pub managed_ip: String,
}

/// Snapshot of the desired bindings for one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    bindings: BTreeMap<Binding, DesiredBinding>,
    skipped: usize,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from raw entries, collapsing duplicate pairs.
    ///
    /// Entries are visited in key order, so when two ids carry the same pair
    /// with different masks the lexically first id decides the mask.
    pub fn from_records<'a, I>(records: I, default_prefix_len: u8) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a BindingRecord)>,
    {
        let mut state = Self::new();
        let mut sorted: Vec<_> = records.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        for (id, record) in sorted {
            match DesiredBinding::parse(&record.floating_ip, &record.managed_ip, default_prefix_len)
            {
                Ok(desired) => state.insert(desired),
                Err(e) => {
                    debug!(id, error = %e, "Skipping invalid binding entry");
                    state.skipped += 1;
                }
            }
        }

        state
    }

    /// Parses store content. Never fails; see the module docs.
    pub fn parse_json(raw: &str, default_prefix_len: u8) -> Self {
        let object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                debug!("Desired-state content is not a JSON object, treating as empty");
                return Self::new();
            }
            Err(e) => {
                debug!(error = %e, "Desired-state content is not valid JSON, treating as empty");
                return Self::new();
            }
        };

        let mut records = BTreeMap::new();
        let mut malformed = 0;
        for (id, value) in object {
            match serde_json::from_value::<BindingRecord>(value) {
                Ok(record) => {
                    records.insert(id, record);
                }
                Err(e) => {
                    debug!(id = %id, error = %e, "Skipping malformed binding entry");
                    malformed += 1;
                }
            }
        }

        let mut state =
            Self::from_records(records.iter().map(|(k, v)| (k.as_str(), v)), default_prefix_len);
        state.skipped += malformed;
        state
    }

    /// Adds a binding; an already-present pair keeps its first floating prefix.
    pub fn insert(&mut self, desired: DesiredBinding) {
        self.bindings.entry(desired.binding).or_insert(desired);
    }

    /// Drops a binding, counting it as skipped.
    pub fn reject(&mut self, binding: &Binding) -> Option<DesiredBinding> {
        let removed = self.bindings.remove(binding);
        if removed.is_some() {
            self.skipped += 1;
        }
        removed
    }

    pub fn contains(&self, binding: &Binding) -> bool {
        self.bindings.contains_key(binding)
    }

    pub fn get(&self, binding: &Binding) -> Option<&DesiredBinding> {
        self.bindings.get(binding)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DesiredBinding> {
        self.bindings.values()
    }

    /// Floating addresses of every desired binding.
    pub fn floating_ips(&self) -> BTreeSet<Ipv4Addr> {
        self.bindings.keys().map(|b| b.floating_ip).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of entries dropped because they could not be used.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Read access to the desired bindings.
#[async_trait]
pub trait BindingSource: Send + Sync {
    /// Returns the current desired state. Implementations degrade to an
    /// empty state rather than failing.
    async fn load(&self) -> DesiredState;
}

/// [`BindingSource`] backed by a JSON file, re-read on every call.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    default_prefix_len: u8,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_prefix_len: DEFAULT_PREFIX_LEN,
        }
    }

    pub fn with_default_prefix_len(mut self, len: u8) -> Self {
        self.default_prefix_len = len;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BindingSource for JsonFileStore {
    async fn load(&self) -> DesiredState {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => DesiredState::parse_json(&raw, self.default_prefix_len),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Desired-state file not readable, load fail");
                DesiredState::new()
            }
        }
    }
}
