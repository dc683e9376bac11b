//! Floating-IP NAT reconciliation daemon
//!
//! Keeps the host's nat table and one interface's address list in sync with
//! a declared set of floating-to-managed IPv4 bindings, polling the
//! desired-state store on a fixed interval.
//!
//! Components, leaves first:
//! - [`AddressController`]: addresses on the managed interface
//! - [`NatController`]: owned chains and DNAT/SNAT rule pairs
//! - [`inspector`]: parses rule listings back into bindings
//! - [`Reconciler`]: one tick of the control loop, and the drain
//! - [`Daemon`]: ticks on a [`Ticker`] and drains on shutdown

mod address;
mod commands;
pub mod config;
mod daemon;
mod error;
pub mod inspector;
mod nat;
mod reconciler;
pub mod shutdown;
mod tables;
mod ticker;

pub use address::AddressController;
pub use commands::*;
pub use config::FloatipConfig;
pub use daemon::{Daemon, DaemonState};
pub use error::{FatalError, FatalResult, OrFatal};
pub use nat::{AddressRelease, NatController};
pub use reconciler::{DrainReport, HostHandles, ReconcileOptions, Reconciler, TickReport};
pub use tables::*;
pub use ticker::Ticker;
