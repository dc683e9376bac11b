//! In-memory `iptables` nat table.
//!
//! Understands the subset of the command line floatipd uses
//! (`-t`, `-w`, `-n`, `-N`, `-L`, `-C`, `-A`, `-I`, `-D`, `-F`) and renders
//! `-n -L` output in the same columns as the real tool, so the rule
//! inspector is exercised against realistic text.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use floatip_common::{FipError, FipResult, NatTable};
use parking_lot::Mutex;

const BUILTIN_CHAINS: &[&str] = &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"];

/// One parsed `iptables` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    table: String,
    action: char,
    chain: Option<String>,
    spec: Vec<String>,
}

impl Invocation {
    fn parse(args: &[String]) -> FipResult<Self> {
        let mut table = "filter".to_string();
        let mut action = None;
        let mut chain = None;
        let mut spec = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-w" | "-n" => {}
                "-t" => {
                    table = iter
                        .next()
                        .ok_or_else(|| FipError::internal("-t requires a table"))?
                        .clone();
                }
                "-N" | "-L" | "-C" | "-A" | "-I" | "-D" | "-F" => {
                    action = arg.chars().nth(1);
                    chain = iter.next().cloned();
                }
                other => spec.push(other.to_string()),
            }
        }

        let action = action.ok_or_else(|| FipError::internal("no iptables action given"))?;
        Ok(Self {
            table,
            action,
            chain,
            spec,
        })
    }

    fn is_mutation(&self) -> bool {
        matches!(self.action, 'N' | 'A' | 'I' | 'D' | 'F')
    }
}

#[derive(Debug)]
struct NatState {
    chains: BTreeMap<String, Vec<Vec<String>>>,
    calls: Vec<Vec<String>>,
    mutations: usize,
}

impl Default for NatState {
    fn default() -> Self {
        let chains = BUILTIN_CHAINS
            .iter()
            .map(|c| (c.to_string(), Vec::new()))
            .collect();
        Self {
            chains,
            calls: Vec::new(),
            mutations: 0,
        }
    }
}

/// [`NatTable`] over an in-memory nat table.
#[derive(Debug, Default)]
pub struct FakeIptables {
    state: Mutex<NatState>,
    fail_inserts: AtomicBool,
    fail_listings: AtomicBool,
    fail_chain_create: AtomicBool,
}

fn failed(args: &[String], exit_code: i32, output: &str) -> FipError {
    FipError::ShellCommandFailed {
        command: format!("iptables {}", args.join(" ")),
        exit_code,
        output: output.to_string(),
    }
}

/// Value following `flag` in a rule spec.
fn spec_value<'a>(spec: &'a [String], flag: &str) -> Option<&'a str> {
    spec.iter()
        .position(|s| s == flag)
        .and_then(|i| spec.get(i + 1))
        .map(String::as_str)
}

fn render_rule(spec: &[String]) -> String {
    let target = spec_value(spec, "-j").unwrap_or("");
    let source = spec_value(spec, "-s").unwrap_or("0.0.0.0/0");
    let destination = spec_value(spec, "-d").unwrap_or("0.0.0.0/0");

    let mut extra = Vec::new();
    if let Some(t) = spec_value(spec, "--dst-type") {
        extra.push(format!("ADDRTYPE match dst-type {t}"));
    }
    if let Some(to) = spec_value(spec, "--to-destination").or_else(|| spec_value(spec, "--to-source")) {
        extra.push(format!("to:{to}"));
    }

    format!(
        "{:<10} {:<4} {:<3} {:<20} {:<20} {}",
        target,
        "all",
        "--",
        source,
        destination,
        extra.join(" ")
    )
    .trim_end()
    .to_string()
}

impl FakeIptables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `-I`/`-A` fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes every `-L` fail.
    pub fn fail_listings(&self, fail: bool) {
        self.fail_listings.store(fail, Ordering::SeqCst);
    }

    /// Makes every `-N` fail.
    pub fn fail_chain_create(&self, fail: bool) {
        self.fail_chain_create.store(fail, Ordering::SeqCst);
    }

    /// Appends a rule directly, bypassing call tracking (drift simulation).
    pub fn seed_rule(&self, chain: &str, spec: &[&str]) {
        self.state
            .lock()
            .chains
            .entry(chain.to_string())
            .or_default()
            .push(spec.iter().map(|s| s.to_string()).collect());
    }

    /// Deletes the first matching rule directly, bypassing call tracking.
    pub fn remove_rule(&self, chain: &str, spec: &[&str]) -> bool {
        let spec: Vec<String> = spec.iter().map(|s| s.to_string()).collect();
        let mut state = self.state.lock();
        let Some(rules) = state.chains.get_mut(chain) else {
            return false;
        };
        match rules.iter().position(|r| *r == spec) {
            Some(pos) => {
                rules.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Creates a user chain directly.
    pub fn seed_chain(&self, chain: &str) {
        self.state.lock().chains.entry(chain.to_string()).or_default();
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.state.lock().chains.contains_key(chain)
    }

    pub fn chain_names(&self) -> BTreeSet<String> {
        self.state.lock().chains.keys().cloned().collect()
    }

    /// Rule specs of `chain`, in order.
    pub fn rules(&self, chain: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .chains
            .get(chain)
            .cloned()
            .unwrap_or_default()
    }

    /// `(match, to)` pairs of every rule in `chain` jumping to `target`,
    /// where `match` is the value of `match_flag` and `to` of `to_flag`.
    pub fn nat_pairs(
        &self,
        chain: &str,
        target: &str,
        match_flag: &str,
        to_flag: &str,
    ) -> Vec<(String, String)> {
        self.rules(chain)
            .iter()
            .filter(|spec| spec_value(spec, "-j") == Some(target))
            .filter_map(|spec| {
                Some((
                    spec_value(spec, match_flag)?.to_string(),
                    spec_value(spec, to_flag)?.to_string(),
                ))
            })
            .collect()
    }

    /// Every invocation seen so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().calls.clone()
    }

    /// Number of invocations that changed the table.
    pub fn mutation_count(&self) -> usize {
        self.state.lock().mutations
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.mutations = 0;
    }

    fn render_chain(state: &NatState, chain: &str) -> String {
        let mut out = String::new();
        if BUILTIN_CHAINS.contains(&chain) {
            let _ = writeln!(out, "Chain {chain} (policy ACCEPT)");
        } else {
            let references: usize = state
                .chains
                .values()
                .flatten()
                .filter(|spec| spec_value(spec, "-j") == Some(chain))
                .count();
            let _ = writeln!(out, "Chain {chain} ({references} references)");
        }
        let _ = writeln!(
            out,
            "{:<10} {:<4} {:<3} {:<20} {:<20}",
            "target", "prot", "opt", "source", "destination"
        );
        for spec in state.chains.get(chain).into_iter().flatten() {
            let _ = writeln!(out, "{}", render_rule(spec));
        }
        out
    }
}

#[async_trait]
impl NatTable for FakeIptables {
    async fn raw(&self, args: &[String]) -> FipResult<String> {
        let inv = Invocation::parse(args)?;
        let mut state = self.state.lock();
        state.calls.push(args.to_vec());

        if inv.table != "nat" {
            return Err(failed(args, 3, "table not emulated"));
        }

        let no_chain = || failed(args, 1, "iptables: No chain/target/match by that name.");

        let result = match inv.action {
            'N' => {
                let chain = inv.chain.clone().ok_or_else(no_chain)?;
                if self.fail_chain_create.load(Ordering::SeqCst) {
                    return Err(failed(args, 4, "injected chain failure"));
                }
                if state.chains.contains_key(&chain) {
                    return Err(failed(args, 1, "iptables: Chain already exists."));
                }
                state.chains.insert(chain, Vec::new());
                String::new()
            }
            'L' => {
                if self.fail_listings.load(Ordering::SeqCst) {
                    return Err(failed(args, 4, "injected listing failure"));
                }
                match &inv.chain {
                    Some(chain) if state.chains.contains_key(chain) => {
                        Self::render_chain(&state, chain)
                    }
                    Some(_) => return Err(no_chain()),
                    None => state
                        .chains
                        .keys()
                        .map(|c| Self::render_chain(&state, c))
                        .collect::<Vec<_>>()
                        .join("\n"),
                }
            }
            'C' => {
                let chain = inv.chain.clone().ok_or_else(no_chain)?;
                let rules = state.chains.get(&chain).ok_or_else(no_chain)?;
                if !rules.contains(&inv.spec) {
                    return Err(failed(
                        args,
                        1,
                        "iptables: Bad rule (does a matching rule exist in that chain?).",
                    ));
                }
                String::new()
            }
            'A' | 'I' => {
                if self.fail_inserts.load(Ordering::SeqCst) {
                    return Err(failed(args, 4, "injected insert failure"));
                }
                let chain = inv.chain.clone().ok_or_else(no_chain)?;
                let rules = state.chains.get_mut(&chain).ok_or_else(no_chain)?;
                if inv.action == 'A' {
                    rules.push(inv.spec.clone());
                } else {
                    rules.insert(0, inv.spec.clone());
                }
                String::new()
            }
            'D' => {
                let chain = inv.chain.clone().ok_or_else(no_chain)?;
                let rules = state.chains.get_mut(&chain).ok_or_else(no_chain)?;
                let pos = rules.iter().position(|r| *r == inv.spec).ok_or_else(|| {
                    failed(
                        args,
                        1,
                        "iptables: Bad rule (does a matching rule exist in that chain?).",
                    )
                })?;
                rules.remove(pos);
                String::new()
            }
            'F' => {
                match &inv.chain {
                    Some(chain) => state.chains.get_mut(chain).ok_or_else(no_chain)?.clear(),
                    None => state.chains.values_mut().for_each(Vec::clear),
                }
                String::new()
            }
            other => return Err(failed(args, 2, &format!("unsupported action -{other}"))),
        };

        if inv.is_mutation() {
            state.mutations += 1;
        }
        tracing::trace!(args = ?args, "fake iptables call");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn test_chain_lifecycle() {
        let ipt = FakeIptables::new();
        assert!(ipt.raw(&args("-t nat -n -L FLOAT_IP_PREROUTING")).await.is_err());
        ipt.raw(&args("-t nat -N FLOAT_IP_PREROUTING")).await.unwrap();
        assert!(ipt.raw(&args("-t nat -N FLOAT_IP_PREROUTING")).await.is_err());
        assert!(ipt.has_chain("FLOAT_IP_PREROUTING"));
        assert_eq!(ipt.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_check_insert_delete() {
        let ipt = FakeIptables::new();
        ipt.seed_chain("FLOAT_IP_PREROUTING");
        let rule = "FLOAT_IP_PREROUTING -d 10.0.0.5 -j DNAT --to-destination 10.0.0.10";

        assert!(ipt.raw(&args(&format!("-t nat -C {rule}"))).await.is_err());
        ipt.raw(&args(&format!("-t nat -I {rule}"))).await.unwrap();
        ipt.raw(&args(&format!("-t nat -C {rule}"))).await.unwrap();
        ipt.raw(&args(&format!("-t nat -D {rule}"))).await.unwrap();
        assert!(ipt.raw(&args(&format!("-t nat -D {rule}"))).await.is_err());
        assert!(ipt.rules("FLOAT_IP_PREROUTING").is_empty());
    }

    #[tokio::test]
    async fn test_listing_layout() {
        let ipt = FakeIptables::new();
        ipt.seed_chain("FLOAT_IP_PREROUTING");
        ipt.seed_rule(
            "FLOAT_IP_PREROUTING",
            &["-d", "10.0.0.5", "-j", "DNAT", "--to-destination", "10.0.0.10"],
        );
        ipt.seed_rule(
            "PREROUTING",
            &["-m", "addrtype", "--dst-type", "LOCAL", "-j", "FLOAT_IP_PREROUTING"],
        );

        let out = ipt.raw(&args("-t nat -n -L FLOAT_IP_PREROUTING")).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Chain FLOAT_IP_PREROUTING (1 references)");
        assert!(lines[1].starts_with("target     prot opt source"));
        let fields: Vec<&str> = lines[2].split_whitespace().collect();
        assert_eq!(
            fields,
            vec!["DNAT", "all", "--", "0.0.0.0/0", "10.0.0.5", "to:10.0.0.10"]
        );
    }

    #[tokio::test]
    async fn test_flush() {
        let ipt = FakeIptables::new();
        ipt.seed_chain("FLOAT_IP_POSTROUTING");
        ipt.seed_rule(
            "FLOAT_IP_POSTROUTING",
            &["-s", "10.0.0.10", "-j", "SNAT", "--to-source", "10.0.0.5"],
        );
        ipt.raw(&args("-t nat -F FLOAT_IP_POSTROUTING")).await.unwrap();
        assert!(ipt.rules("FLOAT_IP_POSTROUTING").is_empty());
    }
}
