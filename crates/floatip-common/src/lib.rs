//! Common infrastructure for the floating-IP daemon.
//!
//! This crate holds everything the reconciliation core talks to but does not
//! own:
//!
//! - [`shell`]: Safe shell command execution with proper quoting
//! - [`host`]: The [`LinkOps`] and [`NatTable`] primitives, with
//!   shell-backed implementations driving `ip` and `iptables`
//! - [`store`]: The [`BindingSource`] trait and the JSON file store
//! - [`retry`]: Fixed-backoff retry for transient host lookups
//! - [`error`]: Error types shared by the above
//!
//! # Example
//!
//! ```ignore
//! use floatip_common::{host::ShellLink, LinkOps};
//!
//! async fn show(iface: &str) -> floatip_common::FipResult<()> {
//!     for addr in ShellLink::new().addresses(iface).await? {
//!         println!("{addr}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod host;
pub mod retry;
pub mod shell;
pub mod store;

// Re-export commonly used items at crate root
pub use error::{FipError, FipResult};
pub use host::{LinkOps, NatTable};
pub use retry::RetryPolicy;
pub use store::{BindingSource, DesiredState, JsonFileStore};
