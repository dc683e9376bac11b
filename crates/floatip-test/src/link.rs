//! In-memory interface address table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use floatip_common::{FipError, FipResult, LinkOps};
use floatip_types::Ipv4Prefix;
use parking_lot::Mutex;

/// Address mutation recorded by [`FakeLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChange {
    Add(String, Ipv4Prefix),
    Del(String, Ipv4Prefix),
}

/// [`LinkOps`] over an in-memory map of interface -> addresses.
///
/// Behaves like `ip`: adding a present address or deleting an absent one
/// fails, as does any call on an unknown interface.
#[derive(Debug, Default)]
pub struct FakeLink {
    interfaces: Mutex<BTreeMap<String, Vec<Ipv4Prefix>>>,
    default_iface: Mutex<Option<String>>,
    changes: Mutex<Vec<LinkChange>>,
    list_calls: AtomicU32,
    list_failures: AtomicU32,
    fail_add: AtomicBool,
    fail_del: AtomicBool,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `iface` with the given addresses and makes it the default route.
    pub fn with_interface(self, iface: &str, addrs: &[&str]) -> Self {
        let parsed = addrs
            .iter()
            .map(|a| a.parse().expect("fixture address must be a valid prefix"))
            .collect();
        self.interfaces.lock().insert(iface.to_string(), parsed);
        self.default_iface.lock().get_or_insert_with(|| iface.to_string());
        self
    }

    pub fn without_default_route(self) -> Self {
        *self.default_iface.lock() = None;
        self
    }

    /// Makes the next `n` address listings fail with an interface error.
    pub fn fail_next_listings(&self, n: u32) {
        self.list_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_del.store(fail, Ordering::SeqCst);
    }

    /// Assigns an address directly, bypassing change tracking.
    pub fn seed_address(&self, iface: &str, prefix: &str) {
        let prefix = prefix.parse().expect("fixture address must be a valid prefix");
        self.interfaces
            .lock()
            .entry(iface.to_string())
            .or_default()
            .push(prefix);
    }

    /// Current addresses of `iface`, rendered as `a.b.c.d/len`.
    pub fn addresses_of(&self, iface: &str) -> Vec<String> {
        self.interfaces
            .lock()
            .get(iface)
            .map(|addrs| addrs.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub fn changes(&self) -> Vec<LinkChange> {
        self.changes.lock().clone()
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn clear_changes(&self) {
        self.changes.lock().clear();
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkOps for FakeLink {
    async fn addresses(&self, iface: &str) -> FipResult<Vec<Ipv4Prefix>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.list_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.list_failures.store(pending - 1, Ordering::SeqCst);
            return Err(FipError::interface(iface, "injected listing failure"));
        }

        self.interfaces
            .lock()
            .get(iface)
            .cloned()
            .ok_or_else(|| FipError::interface(iface, format!("Device \"{iface}\" does not exist.")))
    }

    async fn add_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(FipError::internal("injected add failure"));
        }
        let mut interfaces = self.interfaces.lock();
        let addrs = interfaces
            .get_mut(iface)
            .ok_or_else(|| FipError::interface(iface, "Cannot find device"))?;
        if addrs.contains(prefix) {
            return Err(FipError::internal("RTNETLINK answers: File exists"));
        }
        addrs.push(*prefix);
        self.changes
            .lock()
            .push(LinkChange::Add(iface.to_string(), *prefix));
        Ok(())
    }

    async fn del_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()> {
        if self.fail_del.load(Ordering::SeqCst) {
            return Err(FipError::internal("injected delete failure"));
        }
        let mut interfaces = self.interfaces.lock();
        let addrs = interfaces
            .get_mut(iface)
            .ok_or_else(|| FipError::interface(iface, "Cannot find device"))?;
        let pos = addrs
            .iter()
            .position(|a| a == prefix)
            .ok_or_else(|| FipError::internal("RTNETLINK answers: Cannot assign requested address"))?;
        addrs.remove(pos);
        self.changes
            .lock()
            .push(LinkChange::Del(iface.to_string(), *prefix));
        Ok(())
    }

    async fn default_route_interface(&self) -> FipResult<Option<String>> {
        Ok(self.default_iface.lock().clone())
    }
}
