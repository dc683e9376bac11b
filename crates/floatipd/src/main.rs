//! floatipd - floating-IP NAT reconciliation daemon
//!
//! Forwards floating addresses to managed addresses on this host

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use floatip_common::host::{ShellIptables, ShellLink};
use floatip_common::JsonFileStore;
use floatipd::{shutdown, Daemon, FloatipConfig, HostHandles, Reconciler};
use tracing::{error, info};

/// Floating-IP NAT reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "floatipd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Interface to manage (default: the default-route interface)
    #[arg(short = 'i', long)]
    iface: Option<String>,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Desired-state JSON file, overriding the configuration
    #[arg(long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(if args.debug { "debug" } else { "info" });

    info!("--- Starting floatipd ---");

    match run(args).await {
        Ok(()) => {
            info!("floatipd stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("floatipd exiting: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<FloatipConfig> {
    let mut config = match &args.config {
        Some(path) => FloatipConfig::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => FloatipConfig::default(),
    };

    if let Some(store) = &args.store {
        config.store_path = store.clone();
    }
    if let Some(iface) = &args.iface {
        config.iface = Some(iface.clone());
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    info!(
        store = %config.store_path.display(),
        poll_interval_secs = config.poll_interval_secs,
        "Configuration loaded"
    );

    let token = shutdown::create_shutdown_token();

    let host = HostHandles {
        link: Arc::new(ShellLink::new()),
        nat: Arc::new(ShellIptables::new()),
        source: Arc::new(
            JsonFileStore::new(&config.store_path)
                .with_default_prefix_len(config.default_prefix_len),
        ),
    };

    let reconciler = Reconciler::start(config.iface.clone(), host, config.reconcile_options())
        .await
        .context("starting reconciler")?;

    let daemon = Daemon::new(reconciler, config.poll_interval());
    daemon.run(token).await?;
    Ok(())
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from(["floatipd", "-d", "-i", "ens3", "--store", "/tmp/s.json"]);
        assert!(args.debug);
        let config = load_config(&args).unwrap();
        assert_eq!(config.iface.as_deref(), Some("ens3"));
        assert_eq!(config.store_path, PathBuf::from("/tmp/s.json"));
    }

    #[test]
    fn test_missing_config_file_fails() {
        let args = Args::parse_from(["floatipd", "-c", "/nonexistent/floatipd.toml"]);
        assert!(load_config(&args).is_err());
    }
}
