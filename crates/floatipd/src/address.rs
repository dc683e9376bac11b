//! Address Controller - interface address bookkeeping

use std::net::Ipv4Addr;
use std::sync::Arc;

use floatip_common::{FipError, FipResult, LinkOps, RetryPolicy};
use floatip_types::Ipv4Prefix;
use tracing::{debug, info, instrument};

use crate::error::{FatalError, FatalResult, OrFatal};

/// Address Controller
///
/// Lists, adds and removes IPv4 addresses on the managed interface and
/// resolves the interface itself. Listing and interface resolution retry
/// under the configured [`RetryPolicy`]; everything else runs once.
#[derive(Clone)]
pub struct AddressController {
    link: Arc<dyn LinkOps>,
    retry: RetryPolicy,
}

impl AddressController {
    pub fn new(link: Arc<dyn LinkOps>, retry: RetryPolicy) -> Self {
        Self { link, retry }
    }

    /// Addresses of `iface` in kernel order, retried on transient failure.
    pub async fn list_addresses(&self, iface: &str) -> FatalResult<Vec<Ipv4Prefix>> {
        self.retry
            .run("list addresses", || self.link.addresses(iface))
            .await
            .or_fatal(|| format!("list addresses on {iface}"))
    }

    /// Assigns `prefix` to `iface` unless its address is already there.
    ///
    /// An address present under another mask counts as present and keeps
    /// its mask. Returns whether the interface changed.
    #[instrument(skip(self))]
    pub async fn add_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FatalResult<bool> {
        let current = self.list_addresses(iface).await?;
        if let Some(existing) = current.iter().find(|a| a.same_host(prefix)) {
            if existing.prefix_len() != prefix.prefix_len() {
                debug!(
                    existing = %existing,
                    wanted = %prefix,
                    "Address already on {} with a different mask, keeping it",
                    iface
                );
            } else {
                debug!("Address {} already on {}", prefix, iface);
            }
            return Ok(false);
        }

        self.link
            .add_address(iface, prefix)
            .await
            .or_fatal(|| format!("add address {prefix} on {iface}"))?;
        info!("Added address {} on {}", prefix, iface);
        Ok(true)
    }

    /// Removes `prefix` from `iface` if present.
    ///
    /// Pruning and drain work from a listing they already hold and call
    /// [`remove_listed`](Self::remove_listed) directly, skipping this probe.
    /// Returns whether the interface changed.
    #[instrument(skip(self))]
    pub async fn delete_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<bool> {
        let current = self.link.addresses(iface).await?;
        if !current.contains(prefix) {
            debug!("Address {} not on {}", prefix, iface);
            return Ok(false);
        }
        self.remove_listed(iface, prefix).await?;
        Ok(true)
    }

    /// Removes every address of `iface` carrying `address`, whatever the mask.
    ///
    /// Returns the number of addresses removed.
    #[instrument(skip(self))]
    pub async fn release_floating(&self, iface: &str, address: Ipv4Addr) -> FipResult<usize> {
        let matching: Vec<Ipv4Prefix> = self
            .link
            .addresses(iface)
            .await?
            .into_iter()
            .filter(|a| a.address() == address)
            .collect();

        for prefix in &matching {
            self.remove_listed(iface, prefix).await?;
        }
        Ok(matching.len())
    }

    /// Removes an address just seen in a listing, without probing again.
    pub async fn remove_listed(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()> {
        self.link.del_address(iface, prefix).await?;
        info!("Deleted address {} from {}", prefix, iface);
        Ok(())
    }

    /// The first IPv4 address of `iface`, which floatipd never removes.
    #[instrument(skip(self))]
    pub async fn primary_address(&self, iface: &str) -> FatalResult<Ipv4Prefix> {
        let addresses = self.list_addresses(iface).await?;
        let primary = addresses.first().copied().ok_or_else(|| {
            FatalError::new(
                format!("determine primary address of {iface}"),
                FipError::interface(iface, "no IPv4 address assigned"),
            )
        })?;

        if addresses.len() > 1 {
            info!(
                "Interface {} has {} addresses, keeping {} as primary",
                iface,
                addresses.len(),
                primary
            );
        }
        Ok(primary)
    }

    /// Interface carrying the default route.
    pub async fn resolve_default_interface(&self) -> FatalResult<String> {
        let iface = self
            .retry
            .run("resolve default interface", || async {
                self.link
                    .default_route_interface()
                    .await?
                    .ok_or_else(|| FipError::interface("default", "no default route"))
            })
            .await
            .or_fatal(|| "resolve default interface".to_string())?;

        info!("Using default route interface {}", iface);
        Ok(iface)
    }
}

impl std::fmt::Debug for AddressController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressController")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floatip_test::{FakeLink, LinkChange, IFACE, PRIMARY};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn prefix(s: &str) -> Ipv4Prefix {
        s.parse().unwrap()
    }

    fn controller(link: Arc<FakeLink>) -> AddressController {
        AddressController::new(link, RetryPolicy::new(3, Duration::from_millis(10)))
    }

    fn host() -> Arc<FakeLink> {
        Arc::new(FakeLink::new().with_interface(IFACE, &[PRIMARY]))
    }

    #[tokio::test]
    async fn test_add_address_is_idempotent() {
        let link = host();
        let ctl = controller(link.clone());

        assert!(ctl.add_address(IFACE, &prefix("10.0.0.5/24")).await.unwrap());
        assert!(!ctl.add_address(IFACE, &prefix("10.0.0.5/24")).await.unwrap());
        assert!(!ctl.add_address(IFACE, &prefix("10.0.0.5/32")).await.unwrap());
        assert_eq!(link.addresses_of(IFACE), vec![PRIMARY, "10.0.0.5/24"]);
    }

    #[tokio::test]
    async fn test_add_address_failure_is_fatal() {
        let link = host();
        link.fail_adds(true);
        let err = controller(link)
            .add_address(IFACE, &prefix("10.0.0.5/24"))
            .await
            .unwrap_err();
        assert!(err.operation.contains("add address 10.0.0.5/24"));
    }

    #[tokio::test]
    async fn test_delete_address_absent_is_noop() {
        let link = host();
        let ctl = controller(link.clone());
        assert!(!ctl.delete_address(IFACE, &prefix("10.0.0.5/24")).await.unwrap());
        assert_eq!(link.change_count(), 0);
    }

    #[tokio::test]
    async fn test_release_floating_ignores_mask() {
        let link = host();
        link.seed_address(IFACE, "10.0.0.5/24");
        link.seed_address(IFACE, "10.0.0.5/28");
        link.seed_address(IFACE, "10.0.0.6/24");
        let ctl = controller(link.clone());

        let removed = ctl
            .release_floating(IFACE, "10.0.0.5".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(link.addresses_of(IFACE), vec![PRIMARY, "10.0.0.6/24"]);
        assert_eq!(
            link.changes()[0],
            LinkChange::Del(IFACE.to_string(), prefix("10.0.0.5/24"))
        );
    }

    #[tokio::test]
    async fn test_primary_address_is_first() {
        let link = host();
        link.seed_address(IFACE, "10.0.0.9/24");
        let primary = controller(link).primary_address(IFACE).await.unwrap();
        assert_eq!(primary, prefix(PRIMARY));
    }

    #[tokio::test]
    async fn test_primary_address_missing_is_fatal() {
        let link = Arc::new(FakeLink::new().with_interface(IFACE, &[]));
        assert!(controller(link).primary_address(IFACE).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_retries_transient_failures() {
        let link = host();
        link.fail_next_listings(2);
        let addrs = controller(link.clone()).list_addresses(IFACE).await.unwrap();
        assert_eq!(addrs, vec![prefix(PRIMARY)]);
        assert_eq!(link.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_gives_up_after_attempts() {
        let link = host();
        link.fail_next_listings(5);
        assert!(controller(link.clone()).list_addresses(IFACE).await.is_err());
        assert_eq!(link.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_resolve_default_interface() {
        let ctl = controller(host());
        assert_eq!(ctl.resolve_default_interface().await.unwrap(), IFACE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_default_interface_without_route_is_fatal() {
        let link = Arc::new(
            FakeLink::new()
                .with_interface(IFACE, &[PRIMARY])
                .without_default_route(),
        );
        assert!(controller(link).resolve_default_interface().await.is_err());
    }
}
