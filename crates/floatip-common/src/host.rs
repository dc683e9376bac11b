//! Host networking primitives.
//!
//! [`LinkOps`] covers interface addresses and the default route, and
//! [`NatTable`] is the raw `iptables` entry point. The daemon's controllers
//! are written against these traits so tests can swap in in-memory hosts.

use async_trait::async_trait;
use floatip_types::Ipv4Prefix;

use crate::error::{FipError, FipResult};
use crate::shell::{self, IPTABLES_CMD, IP_CMD};

/// Interface address and routing-table primitives.
#[async_trait]
pub trait LinkOps: Send + Sync {
    /// Lists the IPv4 addresses assigned to `iface`, in kernel order.
    ///
    /// Fails with [`FipError::Interface`] when the interface cannot be found.
    async fn addresses(&self, iface: &str) -> FipResult<Vec<Ipv4Prefix>>;

    /// Assigns `prefix` to `iface`.
    async fn add_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()>;

    /// Removes `prefix` from `iface`.
    async fn del_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()>;

    /// Returns the interface carrying the default route, if there is one.
    async fn default_route_interface(&self) -> FipResult<Option<String>>;
}

/// Raw access to the `iptables` command.
///
/// `args` is passed through unchanged (e.g. `["-t", "nat", "-C", ...]`).
/// Returns stdout on exit code 0 and [`FipError::ShellCommandFailed`]
/// otherwise, so a failed `-C` probe reads as "rule absent".
#[async_trait]
pub trait NatTable: Send + Sync {
    async fn raw(&self, args: &[String]) -> FipResult<String>;
}

/// [`LinkOps`] implemented with `/sbin/ip`.
#[derive(Debug, Clone, Default)]
pub struct ShellLink;

impl ShellLink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LinkOps for ShellLink {
    async fn addresses(&self, iface: &str) -> FipResult<Vec<Ipv4Prefix>> {
        let cmd = shell::command_line(IP_CMD, &["-4", "-o", "addr", "show", "dev", iface]);
        match shell::exec_or_throw(&cmd).await {
            Ok(out) => Ok(parse_addr_show(&out)),
            Err(FipError::ShellCommandFailed { output, .. }) => {
                Err(FipError::interface(iface, output))
            }
            Err(e) => Err(e),
        }
    }

    async fn add_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()> {
        let prefix = prefix.to_string();
        let cmd = shell::command_line(IP_CMD, &["addr", "add", &prefix, "dev", iface]);
        shell::exec_or_throw(&cmd).await.map(|_| ())
    }

    async fn del_address(&self, iface: &str, prefix: &Ipv4Prefix) -> FipResult<()> {
        let prefix = prefix.to_string();
        let cmd = shell::command_line(IP_CMD, &["addr", "del", &prefix, "dev", iface]);
        shell::exec_or_throw(&cmd).await.map(|_| ())
    }

    async fn default_route_interface(&self) -> FipResult<Option<String>> {
        let cmd = shell::command_line(IP_CMD, &["-4", "route", "show", "default"]);
        let out = shell::exec_or_throw(&cmd).await?;
        Ok(parse_default_route(&out))
    }
}

/// [`NatTable`] implemented with `/sbin/iptables`.
///
/// `-w` makes concurrent invocations (e.g. from the container engine)
/// wait for the xtables lock instead of failing.
#[derive(Debug, Clone, Default)]
pub struct ShellIptables;

impl ShellIptables {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NatTable for ShellIptables {
    async fn raw(&self, args: &[String]) -> FipResult<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("-w".to_string());
        full.extend(args.iter().cloned());
        let cmd = shell::command_line(IPTABLES_CMD, &full);
        shell::exec_or_throw(&cmd).await
    }
}

/// Parses `ip -4 -o addr show` output into interface prefixes.
///
/// Each line looks like
/// `2: eth0    inet 10.0.0.1/24 brd 10.0.0.255 scope global eth0 ...`;
/// the token after `inet` is the prefix. Unparsable lines are skipped.
pub fn parse_addr_show(output: &str) -> Vec<Ipv4Prefix> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "inet")?;
            tokens.next()?.parse().ok()
        })
        .collect()
}

/// Parses `ip route show default` output and returns the `dev` of the first
/// default route.
pub fn parse_default_route(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("default"))
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "dev")?;
            tokens.next().map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ADDR_SHOW: &str = "\
2: eth0    inet 10.0.0.1/24 brd 10.0.0.255 scope global eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.0.5/24 scope global secondary eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet 203.0.113.9/32 scope global eth0\\       valid_lft forever preferred_lft forever";

    #[test]
    fn test_parse_addr_show() {
        let addrs = parse_addr_show(ADDR_SHOW);
        let rendered: Vec<String> = addrs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["10.0.0.1/24", "10.0.0.5/24", "203.0.113.9/32"]);
    }

    #[test]
    fn test_parse_addr_show_empty_and_garbage() {
        assert!(parse_addr_show("").is_empty());
        assert!(parse_addr_show("2: eth0 inet garbage scope global").is_empty());
        assert!(parse_addr_show("Device \"eth9\" does not exist.").is_empty());
    }

    #[test]
    fn test_parse_default_route() {
        let out = "default via 192.168.1.254 dev ens3 proto dhcp src 192.168.1.20 metric 100";
        assert_eq!(parse_default_route(out), Some("ens3".to_string()));
    }

    #[test]
    fn test_parse_default_route_picks_first_default() {
        let out = "\
10.0.0.0/24 dev docker0 proto kernel scope link
default via 10.1.0.1 dev eth1
default via 10.2.0.1 dev eth2 metric 200";
        assert_eq!(parse_default_route(out), Some("eth1".to_string()));
    }

    #[test]
    fn test_parse_default_route_missing() {
        assert_eq!(parse_default_route(""), None);
        assert_eq!(parse_default_route("10.0.0.0/24 dev eth0 scope link"), None);
    }
}
