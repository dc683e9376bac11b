//! Reconciler - converges live NAT rules and addresses to the desired bindings

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use floatip_common::{BindingSource, DesiredState, LinkOps, NatTable, RetryPolicy};
use floatip_types::{Binding, Ipv4Prefix, RuleKind};
use tracing::{debug, info, instrument, warn};

use crate::address::AddressController;
use crate::error::FatalResult;
use crate::nat::{AddressRelease, NatController};

/// Host-facing collaborators of a [`Reconciler`].
#[derive(Clone)]
pub struct HostHandles {
    pub link: Arc<dyn LinkOps>,
    pub nat: Arc<dyn NatTable>,
    pub source: Arc<dyn BindingSource>,
}

/// Tunables of the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Retry policy for address listing and interface resolution
    pub retry: RetryPolicy,
    /// Skip bindings whose floating address is the primary address
    pub reject_primary_binding: bool,
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Bindings made live
    pub added: usize,
    /// Stale bindings taken down
    pub removed: usize,
    /// Stray interface addresses deleted
    pub addresses_pruned: usize,
    /// Desired entries that could not be used
    pub skipped: usize,
}

impl TickReport {
    /// True when the tick left the host untouched.
    pub fn is_quiet(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.addresses_pruned == 0
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added={} removed={} addresses_pruned={} skipped={}",
            self.added, self.removed, self.addresses_pruned, self.skipped
        )
    }
}

/// What a drain managed to clean up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub chains_flushed: usize,
    pub addresses_removed: usize,
    pub failures: usize,
}

/// Reconciler
///
/// Holds the managed interface, its primary address and the controllers.
/// All state beyond the primary address is re-derived on every tick.
pub struct Reconciler {
    iface: String,
    primary: Ipv4Prefix,
    addresses: AddressController,
    nat: NatController,
    source: Arc<dyn BindingSource>,
    reject_primary_binding: bool,
}

impl Reconciler {
    /// Creates a reconciler for a known interface and primary address.
    ///
    /// Does not touch the host; see [`Reconciler::start`].
    pub fn new(
        iface: impl Into<String>,
        primary: Ipv4Prefix,
        host: HostHandles,
        options: ReconcileOptions,
    ) -> Self {
        let addresses = AddressController::new(host.link, options.retry);
        let nat = NatController::new(host.nat, addresses.clone());
        Self {
            iface: iface.into(),
            primary,
            addresses,
            nat,
            source: host.source,
            reject_primary_binding: options.reject_primary_binding,
        }
    }

    /// Resolves the interface (the default-route one when `iface` is
    /// `None`), captures its primary address and sets up the owned chains.
    #[instrument(skip(host, options))]
    pub async fn start(
        iface: Option<String>,
        host: HostHandles,
        options: ReconcileOptions,
    ) -> FatalResult<Self> {
        let addresses = AddressController::new(host.link.clone(), options.retry);
        let iface = match iface {
            Some(iface) => iface,
            None => addresses.resolve_default_interface().await?,
        };
        let primary = addresses.primary_address(&iface).await?;
        info!("Managing interface {} with primary address {}", iface, primary);

        let reconciler = Self::new(iface, primary, host, options);
        if let Err(e) = reconciler.nat.ensure_chains().await {
            reconciler.drain().await;
            return Err(e);
        }
        Ok(reconciler)
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    pub fn primary(&self) -> Ipv4Prefix {
        self.primary
    }

    /// Loads the desired bindings, dropping self-NAT ones when configured.
    async fn load_desired(&self) -> DesiredState {
        let mut desired = self.source.load().await;
        if self.reject_primary_binding {
            let self_nat: Vec<Binding> = desired
                .iter()
                .map(|d| d.binding)
                .filter(|b| b.floating_ip == self.primary.address())
                .collect();
            for binding in self_nat {
                warn!(
                    "Skipping binding {}: floating address is the primary address of {}",
                    binding, self.iface
                );
                desired.reject(&binding);
            }
        }
        desired
    }

    /// Applies one direction's diff against the live rule set.
    async fn converge(
        &self,
        kind: RuleKind,
        live: &BTreeSet<Binding>,
        desired: &DesiredState,
        report: &mut TickReport,
    ) -> FatalResult<()> {
        let in_use = desired.floating_ips();

        for stale in live.iter().filter(|b| !desired.contains(b)) {
            info!("Removing stale binding {} ({} rule)", stale, kind);
            let release = if stale.floating_ip == self.primary.address()
                || in_use.contains(&stale.floating_ip)
            {
                AddressRelease::Retain
            } else {
                AddressRelease::Release
            };
            if self.nat.remove_binding(&self.iface, stale, release).await {
                report.removed += 1;
            }
        }

        for missing in desired.iter().filter(|d| !live.contains(&d.binding)) {
            info!("Adding missing binding {} ({} rule)", missing.binding, kind);
            if self.nat.add_binding(&self.iface, missing).await? {
                report.added += 1;
            }
        }

        Ok(())
    }

    /// Deletes every address that is neither primary nor a desired floating
    /// address. Deletion failures are logged.
    async fn prune_addresses(&self, desired: &DesiredState) -> FatalResult<usize> {
        let in_use = desired.floating_ips();
        let mut pruned = 0;

        for address in self.addresses.list_addresses(&self.iface).await? {
            if address == self.primary || in_use.contains(&address.address()) {
                continue;
            }
            match self.addresses.remove_listed(&self.iface, &address).await {
                Ok(()) => pruned += 1,
                Err(e) => warn!(error = %e, "Failed to delete stray address {}", address),
            }
        }

        Ok(pruned)
    }

    /// Runs one reconciliation pass.
    ///
    /// Forward rules are converged first; reverse rules are listed only
    /// afterwards so pairs installed by the forward pass are seen as live.
    pub async fn tick(&self) -> FatalResult<TickReport> {
        let desired = self.load_desired().await;
        let mut report = TickReport {
            skipped: desired.skipped(),
            ..TickReport::default()
        };

        let live_forward = self.nat.list_forward_rules().await?;
        self.converge(RuleKind::Forward, &live_forward, &desired, &mut report)
            .await?;

        let live_reverse = self.nat.list_reverse_rules().await?;
        self.converge(RuleKind::Reverse, &live_reverse, &desired, &mut report)
            .await?;

        report.addresses_pruned = self.prune_addresses(&desired).await?;

        if report.is_quiet() {
            debug!(desired = desired.len(), "Tick complete: {}", report);
        } else {
            info!(desired = desired.len(), "Tick complete: {}", report);
        }
        Ok(report)
    }

    /// Tears down everything floatipd installed: flushes both chains and
    /// deletes every address except the primary one. Never fails.
    #[instrument(skip(self), fields(iface = %self.iface))]
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport {
            chains_flushed: self.nat.flush_all().await,
            ..DrainReport::default()
        };

        match self.addresses.list_addresses(&self.iface).await {
            Ok(addresses) => {
                for address in addresses.into_iter().filter(|a| *a != self.primary) {
                    match self.addresses.remove_listed(&self.iface, &address).await {
                        Ok(()) => report.addresses_removed += 1,
                        Err(e) => {
                            warn!(error = %e, "Failed to delete address {}", address);
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to list addresses for drain");
                report.failures += 1;
            }
        }

        info!(
            chains_flushed = report.chains_flushed,
            addresses_removed = report.addresses_removed,
            failures = report.failures,
            "Drain complete"
        );
        report
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("iface", &self.iface)
            .field("primary", &self.primary)
            .field("reject_primary_binding", &self.reject_primary_binding)
            .finish_non_exhaustive()
    }
}
