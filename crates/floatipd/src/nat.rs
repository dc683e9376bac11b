//! NAT Rule Controller - owned chains and per-binding DNAT/SNAT pairs

use std::collections::BTreeSet;
use std::sync::Arc;

use floatip_common::NatTable;
use floatip_types::{Binding, DesiredBinding, RuleKind};
use tracing::{debug, info, instrument, warn};

use crate::address::AddressController;
use crate::commands::*;
use crate::error::{FatalResult, OrFatal};
use crate::inspector;
use crate::tables::{FORWARD_CHAIN, JUMP_RULES, OWNED_CHAINS, REVERSE_CHAIN};

/// Whether removing a binding also takes its floating address off the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRelease {
    /// Delete the floating address, whatever its mask.
    Release,
    /// Keep it: another binding or the primary address still uses it.
    Retain,
}

/// NAT Rule Controller
///
/// Owns `FLOAT_IP_PREROUTING` and `FLOAT_IP_POSTROUTING` in the nat table.
/// Every change is probe-then-act, so repeating an operation is a no-op.
#[derive(Clone)]
pub struct NatController {
    table: Arc<dyn NatTable>,
    addresses: AddressController,
}

impl NatController {
    pub fn new(table: Arc<dyn NatTable>, addresses: AddressController) -> Self {
        Self { table, addresses }
    }

    /// True when the command exits zero.
    async fn probe(&self, args: &[String]) -> bool {
        self.table.raw(args).await.is_ok()
    }

    /// Creates the owned chains and wires them into the built-in chains.
    #[instrument(skip(self))]
    pub async fn ensure_chains(&self) -> FatalResult<()> {
        for chain in OWNED_CHAINS {
            if self.probe(&build_list_chain_args(chain)).await {
                debug!("Chain {} already exists", chain);
                continue;
            }
            self.table
                .raw(&build_new_chain_args(chain))
                .await
                .or_fatal(|| format!("create chain {chain}"))?;
            info!("Created chain {}", chain);
        }

        for (builtin, target) in JUMP_RULES {
            if self
                .probe(&build_jump_rule_args(RuleOp::Check, builtin, target))
                .await
            {
                continue;
            }
            self.table
                .raw(&build_jump_rule_args(RuleOp::Append, builtin, target))
                .await
                .or_fatal(|| format!("add jump rule {builtin} -> {target}"))?;
            info!("Added jump rule {} -> {}", builtin, target);
        }

        Ok(())
    }

    /// Inserts one direction of a binding unless it is already present.
    async fn ensure_rule(&self, kind: RuleKind, binding: &Binding) -> FatalResult<bool> {
        if self
            .probe(&build_rule_args(RuleOp::Check, kind, binding))
            .await
        {
            return Ok(false);
        }
        self.table
            .raw(&build_rule_args(RuleOp::Insert, kind, binding))
            .await
            .or_fatal(|| format!("insert {kind} rule {binding}"))?;
        debug!("Inserted {} rule {}", kind, binding);
        Ok(true)
    }

    /// Makes `desired` fully live: floating address, forward and reverse rule.
    ///
    /// Returns whether anything changed.
    #[instrument(skip(self, desired), fields(binding = %desired.binding))]
    pub async fn add_binding(&self, iface: &str, desired: &DesiredBinding) -> FatalResult<bool> {
        let mut changed = self
            .addresses
            .add_address(iface, &desired.floating_prefix)
            .await?;
        changed |= self.ensure_rule(RuleKind::Forward, &desired.binding).await?;
        changed |= self.ensure_rule(RuleKind::Reverse, &desired.binding).await?;
        Ok(changed)
    }

    /// Deletes one direction of a binding if present. Failures are logged.
    async fn drop_rule(&self, kind: RuleKind, binding: &Binding) -> bool {
        if !self
            .probe(&build_rule_args(RuleOp::Check, kind, binding))
            .await
        {
            return false;
        }
        match self
            .table
            .raw(&build_rule_args(RuleOp::Delete, kind, binding))
            .await
        {
            Ok(_) => {
                debug!("Deleted {} rule {}", kind, binding);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete {} rule {}", kind, binding);
                false
            }
        }
    }

    /// Takes `binding` down: optionally its floating address, then both rules.
    ///
    /// Never fails; errors are logged and the remaining steps still run.
    /// Returns whether anything changed.
    #[instrument(skip(self))]
    pub async fn remove_binding(
        &self,
        iface: &str,
        binding: &Binding,
        release: AddressRelease,
    ) -> bool {
        let mut changed = false;

        if release == AddressRelease::Release {
            match self
                .addresses
                .release_floating(iface, binding.floating_ip)
                .await
            {
                Ok(n) => changed |= n > 0,
                Err(e) => warn!(
                    error = %e,
                    "Failed to release floating address {} from {}",
                    binding.floating_ip,
                    iface
                ),
            }
        }

        changed |= self.drop_rule(RuleKind::Forward, binding).await;
        changed |= self.drop_rule(RuleKind::Reverse, binding).await;
        changed
    }

    async fn list_chain(&self, chain: &str) -> FatalResult<String> {
        self.table
            .raw(&build_list_chain_args(chain))
            .await
            .or_fatal(|| format!("list chain {chain}"))
    }

    /// Bindings with a live DNAT rule in the pre-routing chain.
    pub async fn list_forward_rules(&self) -> FatalResult<BTreeSet<Binding>> {
        let listing = self.list_chain(FORWARD_CHAIN).await?;
        Ok(inspector::forward_bindings(&listing))
    }

    /// Bindings with a live SNAT rule in the post-routing chain.
    pub async fn list_reverse_rules(&self) -> FatalResult<BTreeSet<Binding>> {
        let listing = self.list_chain(REVERSE_CHAIN).await?;
        Ok(inspector::reverse_bindings(&listing))
    }

    /// Empties both owned chains. Returns the number of chains flushed.
    ///
    /// The chains and jump rules stay in place.
    #[instrument(skip(self))]
    pub async fn flush_all(&self) -> usize {
        let mut flushed = 0;
        for chain in OWNED_CHAINS {
            match self.table.raw(&build_flush_chain_args(chain)).await {
                Ok(_) => {
                    info!("Flushed chain {}", chain);
                    flushed += 1;
                }
                Err(e) => warn!(error = %e, "Failed to flush chain {}", chain),
            }
        }
        flushed
    }
}

impl std::fmt::Debug for NatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatController")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}
